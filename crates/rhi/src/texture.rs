//! GPU textures, samplers and non-owning texture handles.
//!
//! A [`Texture`] owns its image, allocation, views and optional sampler, and
//! destroys them on drop. Passes that only read a texture receive a
//! [`TextureRef`]: a `Copy` bundle of raw handles that never frees anything.
//! The current image layout is not stored here; the renderer tracks it.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use deferred_rhi::device::Device;
//! use deferred_rhi::texture::{Texture, TextureDesc};
//! use deferred_rhi::vk;
//!
//! # fn example(device: Arc<Device>) -> Result<(), deferred_rhi::RhiError> {
//! let extent = vk::Extent2D { width: 1280, height: 720 };
//! let depth = Texture::new(device, &TextureDesc::depth("depth", extent))?;
//! assert_eq!(depth.extent(), extent);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::buffer::{Buffer, BufferUsage};
use crate::command::CommandBuffer;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Depth format used for every depth target.
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Creation parameters for a [`Texture`].
#[derive(Clone, Debug)]
pub struct TextureDesc {
    pub name: String,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
    /// Six-layer cube-compatible image with a cube view.
    pub cube: bool,
    /// Also create a 2D-array view for storage writes.
    pub storage_view: bool,
}

impl TextureDesc {
    /// Color render target that later passes sample.
    pub fn color_target(name: impl Into<String>, extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            name: name.into(),
            extent,
            format,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            aspect: vk::ImageAspectFlags::COLOR,
            cube: false,
            storage_view: false,
        }
    }

    /// Depth target in [`DEPTH_FORMAT`].
    pub fn depth(name: impl Into<String>, extent: vk::Extent2D) -> Self {
        Self {
            name: name.into(),
            extent,
            format: DEPTH_FORMAT,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: vk::ImageAspectFlags::DEPTH,
            cube: false,
            storage_view: false,
        }
    }

    /// Cube map written by compute shaders and sampled afterwards.
    pub fn storage_cube(name: impl Into<String>, size: u32, format: vk::Format) -> Self {
        Self {
            name: name.into(),
            extent: vk::Extent2D {
                width: size,
                height: size,
            },
            format,
            usage: vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED,
            aspect: vk::ImageAspectFlags::COLOR,
            cube: true,
            storage_view: true,
        }
    }

    /// Sampled RGBA8 texture filled by [`Texture::upload_rgba8`].
    pub fn sampled_rgba8(name: impl Into<String>, width: u32, height: u32, srgb: bool) -> Self {
        Self {
            name: name.into(),
            extent: vk::Extent2D { width, height },
            format: if srgb {
                vk::Format::R8G8B8A8_SRGB
            } else {
                vk::Format::R8G8B8A8_UNORM
            },
            usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            aspect: vk::ImageAspectFlags::COLOR,
            cube: false,
            storage_view: false,
        }
    }

    /// Adds usage flags.
    pub fn with_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage |= usage;
        self
    }

    #[inline]
    pub fn layer_count(&self) -> u32 {
        if self.cube { 6 } else { 1 }
    }
}

/// Non-owning handle to a texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureRef {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub storage_view: Option<vk::ImageView>,
    pub sampler: Option<vk::Sampler>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub aspect: vk::ImageAspectFlags,
    pub layer_count: u32,
}

impl TextureRef {
    /// Subresource range covering every layer of the single mip level.
    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange::default()
            .aspect_mask(self.aspect)
            .level_count(1)
            .layer_count(self.layer_count)
    }
}

/// Image with allocation, views and optional sampler.
pub struct Texture {
    device: Arc<Device>,
    name: String,
    image: vk::Image,
    view: vk::ImageView,
    storage_view: Option<vk::ImageView>,
    sampler: Option<Sampler>,
    allocation: Option<Allocation>,
    format: vk::Format,
    extent: vk::Extent2D,
    aspect: vk::ImageAspectFlags,
    layer_count: u32,
}

impl Texture {
    /// Creates a device-local texture.
    ///
    /// # Errors
    ///
    /// Returns an error if the extent is empty or any Vulkan call fails.
    pub fn new(device: Arc<Device>, desc: &TextureDesc) -> RhiResult<Self> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(RhiError::TextureError(format!(
                "Texture '{}' has an empty extent",
                desc.name
            )));
        }

        let layer_count = desc.layer_count();
        let flags = if desc.cube {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };
        let image_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(layer_count)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };

        // From here on, a partially built texture cleans up through Drop.
        let mut texture = Self {
            device: device.clone(),
            name: desc.name.clone(),
            image,
            view: vk::ImageView::null(),
            storage_view: None,
            sampler: None,
            allocation: None,
            format: desc.format,
            extent: desc.extent,
            aspect: desc.aspect,
            layer_count,
        };

        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };
        let allocation = device
            .allocator()
            .lock()
            .expect("allocator mutex poisoned")
            .allocate(&AllocationCreateDesc {
                name: &desc.name,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?;
        unsafe {
            device
                .handle()
                .bind_image_memory(image, allocation.memory(), allocation.offset())?;
        }
        texture.allocation = Some(allocation);

        let view_type = if desc.cube {
            vk::ImageViewType::CUBE
        } else {
            vk::ImageViewType::TYPE_2D
        };
        texture.view = texture.create_view(view_type)?;
        if desc.storage_view {
            texture.storage_view = Some(texture.create_view(vk::ImageViewType::TYPE_2D_ARRAY)?);
        }

        debug!(
            "Created texture '{}': {}x{} {:?} ({} layer(s))",
            desc.name, desc.extent.width, desc.extent.height, desc.format, layer_count
        );
        Ok(texture)
    }

    fn create_view(&self, view_type: vk::ImageViewType) -> RhiResult<vk::ImageView> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(self.image)
            .view_type(view_type)
            .format(self.format)
            .subresource_range(self.subresource_range());
        let view = unsafe { self.device.handle().create_image_view(&view_info, None) }
            .map_err(|e| {
                RhiError::TextureError(format!("View for '{}' failed: {e:?}", self.name))
            })?;
        Ok(view)
    }

    /// Attaches a sampler that is destroyed with the texture.
    pub fn with_sampler(mut self, sampler: Sampler) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Records a copy of tightly packed RGBA8 `pixels` into the texture.
    ///
    /// The texture must be in `TRANSFER_DST_OPTIMAL`. The returned staging
    /// buffer must stay alive until the command buffer has executed.
    ///
    /// # Errors
    ///
    /// Returns an error if `pixels` does not match the extent.
    pub fn upload_rgba8(&self, cmd: &CommandBuffer, pixels: &[u8]) -> RhiResult<Buffer> {
        let expected = (self.extent.width * self.extent.height * 4) as usize;
        if pixels.len() != expected {
            return Err(RhiError::TextureError(format!(
                "Texture '{}' expects {} bytes, got {}",
                self.name,
                expected,
                pixels.len()
            )));
        }

        let staging = Buffer::new_with_data(self.device.clone(), BufferUsage::Staging, pixels)?;
        let region = vk::BufferImageCopy::default()
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(self.aspect)
                    .layer_count(1),
            )
            .image_extent(vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            });
        cmd.copy_buffer_to_image(
            staging.handle(),
            self.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );
        Ok(staging)
    }

    /// Non-owning handle for dependants.
    pub fn handle(&self) -> TextureRef {
        TextureRef {
            image: self.image,
            view: self.view,
            storage_view: self.storage_view,
            sampler: self.sampler.as_ref().map(Sampler::handle),
            format: self.format,
            extent: self.extent,
            aspect: self.aspect,
            layer_count: self.layer_count,
        }
    }

    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange::default()
            .aspect_mask(self.aspect)
            .level_count(1)
            .layer_count(self.layer_count)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            if let Some(view) = self.storage_view.take() {
                self.device.handle().destroy_image_view(view, None);
            }
            if self.view != vk::ImageView::null() {
                self.device.handle().destroy_image_view(self.view, None);
            }
            self.device.handle().destroy_image(self.image, None);
        }

        if let Some(allocation) = self.allocation.take()
            && let Ok(mut allocator) = self.device.allocator().lock()
            && let Err(e) = allocator.free(allocation)
        {
            error!("Failed to free texture '{}': {:?}", self.name, e);
        }

        debug!("Destroyed texture '{}'", self.name);
    }
}

/// Sampler wrapper.
pub struct Sampler {
    device: Arc<Device>,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Linear filtering with the given address mode.
    pub fn linear(device: Arc<Device>, address_mode: vk::SamplerAddressMode) -> RhiResult<Self> {
        Self::create(device, vk::Filter::LINEAR, address_mode)
    }

    /// Nearest filtering, clamped. Used for depth and G-buffer reads.
    pub fn nearest(device: Arc<Device>) -> RhiResult<Self> {
        Self::create(
            device,
            vk::Filter::NEAREST,
            vk::SamplerAddressMode::CLAMP_TO_EDGE,
        )
    }

    fn create(
        device: Arc<Device>,
        filter: vk::Filter,
        address_mode: vk::SamplerAddressMode,
    ) -> RhiResult<Self> {
        let info = vk::SamplerCreateInfo::default()
            .mag_filter(filter)
            .min_filter(filter)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .max_lod(vk::LOD_CLAMP_NONE);
        let sampler = unsafe { device.handle().create_sampler(&info, None)? };
        Ok(Self { device, sampler })
    }

    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_sampler(self.sampler, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_desc_has_six_layers() {
        let desc = TextureDesc::storage_cube("env", 64, vk::Format::R16G16B16A16_SFLOAT);
        assert_eq!(desc.layer_count(), 6);
        assert!(desc.usage.contains(vk::ImageUsageFlags::STORAGE));
        assert!(desc.storage_view);
    }

    #[test]
    fn test_depth_desc_with_copy_usage() {
        let extent = vk::Extent2D {
            width: 4,
            height: 4,
        };
        let desc = TextureDesc::depth("depth", extent).with_usage(vk::ImageUsageFlags::TRANSFER_SRC);
        assert_eq!(desc.format, DEPTH_FORMAT);
        assert_eq!(desc.aspect, vk::ImageAspectFlags::DEPTH);
        assert!(desc.usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT));
        assert!(desc.usage.contains(vk::ImageUsageFlags::TRANSFER_SRC));
    }

    #[test]
    fn test_texture_ref_range_covers_layers() {
        let handle = TextureRef {
            image: vk::Image::null(),
            view: vk::ImageView::null(),
            storage_view: None,
            sampler: None,
            format: vk::Format::R8G8B8A8_UNORM,
            extent: vk::Extent2D::default(),
            aspect: vk::ImageAspectFlags::COLOR,
            layer_count: 6,
        };
        let range = handle.subresource_range();
        assert_eq!(range.layer_count, 6);
        assert_eq!(range.level_count, 1);
    }

    #[test]
    fn test_texture_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Texture>();
        assert_send_sync::<Sampler>();
    }
}
