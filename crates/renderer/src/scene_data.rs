//! GPU-side scene data read by every pass.
//!
//! Created once when the scene is loaded, immutable afterwards apart from
//! the per-slot camera uniforms.
//!
//! Set 0 layout, shared by every pass that needs the camera or materials:
//!
//! ```text
//! binding 0: CameraUbo                       (vertex | fragment)
//! binding 1: sampler2D[MAX_MATERIAL_TEXTURES] (fragment, partially bound)
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use deferred_rhi::buffer::{Buffer, BufferUsage};
use deferred_rhi::command::CommandPool;
use deferred_rhi::descriptor::{
    DescriptorBindingBuilder, DescriptorPool, DescriptorSetLayout, DescriptorWriter,
};
use deferred_rhi::device::Device;
use deferred_rhi::texture::{Sampler, Texture, TextureDesc};
use deferred_scene::{Aabb, Material, Primitive, SceneGeometry};

use crate::error::{RenderError, RenderResult};
use crate::layout::{ImageState, record_barrier, untracked_transition};
use crate::ubo::CameraUbo;

/// Capacity of the bindless material texture array.
pub const MAX_MATERIAL_TEXTURES: u32 = 64;

pub struct SceneGlobalData {
    device: Arc<Device>,
    frame_sets: Vec<vk::DescriptorSet>,
    descriptor_pool: DescriptorPool,
    set_layout: DescriptorSetLayout,
    camera_buffers: Vec<Buffer>,
    textures: Vec<Texture>,
    index_buffer: Buffer,
    vertex_buffer: Buffer,
    vertex_address: vk::DeviceAddress,
    primitives: Vec<Primitive>,
    materials: Vec<Material>,
    bounds: Aabb,
}

impl SceneGlobalData {
    /// Uploads `geometry` and builds one camera uniform and descriptor set
    /// per frame slot.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Scene`] for empty or inconsistent geometry and
    /// propagates any GPU creation or upload failure.
    pub fn new(
        device: Arc<Device>,
        command_pool: &CommandPool,
        geometry: &SceneGeometry,
        frames_in_flight: usize,
    ) -> RenderResult<Self> {
        validate_geometry(geometry)?;

        let vertex_buffer = Buffer::new_with_data(
            device.clone(),
            BufferUsage::VertexStorage,
            bytemuck::cast_slice(&geometry.vertices),
        )?;
        let vertex_address = vertex_buffer.device_address();
        let index_buffer = Buffer::new_with_data(
            device.clone(),
            BufferUsage::Index,
            bytemuck::cast_slice(&geometry.indices),
        )?;

        let textures = upload_textures(&device, command_pool, geometry)?;

        let set_layout = DescriptorSetLayout::with_binding_flags(
            device.clone(),
            &[
                DescriptorBindingBuilder::uniform_buffer(
                    0,
                    vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                ),
                DescriptorBindingBuilder::combined_image_sampler_array(
                    1,
                    MAX_MATERIAL_TEXTURES,
                    vk::ShaderStageFlags::FRAGMENT,
                ),
            ],
            &[
                vk::DescriptorBindingFlags::empty(),
                vk::DescriptorBindingFlags::PARTIALLY_BOUND,
            ],
        )?;

        let slots = frames_in_flight as u32;
        let descriptor_pool = DescriptorPool::new(
            device.clone(),
            slots,
            &[
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::UNIFORM_BUFFER,
                    descriptor_count: slots,
                },
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    descriptor_count: slots * MAX_MATERIAL_TEXTURES,
                },
            ],
        )?;
        let layouts = vec![set_layout.handle(); frames_in_flight];
        let frame_sets = descriptor_pool.allocate(&layouts)?;

        let material_images: Vec<(vk::Sampler, vk::ImageView)> = textures
            .iter()
            .map(|texture| {
                let handle = texture.handle();
                (handle.sampler.unwrap_or_default(), handle.view)
            })
            .collect();

        let mut camera_buffers = Vec::with_capacity(frames_in_flight);
        for (slot, &set) in frame_sets.iter().enumerate() {
            let buffer = Buffer::new(device.clone(), BufferUsage::Uniform, CameraUbo::SIZE as u64)?;
            DescriptorWriter::new(set)
                .uniform_buffer(0, buffer.handle())
                .sampled_images(1, &material_images, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .commit(&device);
            debug!("Scene descriptor set written for slot {}", slot);
            camera_buffers.push(buffer);
        }

        info!(
            "Scene uploaded: {} vertices, {} triangles, {} primitives, {} textures",
            geometry.vertices.len(),
            geometry.triangle_count(),
            geometry.primitives.len(),
            textures.len()
        );

        Ok(Self {
            device,
            frame_sets,
            descriptor_pool,
            set_layout,
            camera_buffers,
            textures,
            index_buffer,
            vertex_buffer,
            vertex_address,
            primitives: geometry.primitives.clone(),
            materials: geometry.materials.clone(),
            bounds: geometry.bounds,
        })
    }

    /// Writes the camera snapshot for `slot`.
    ///
    /// Only call once the slot's fence has been waited on.
    pub fn update_camera(&self, slot: usize, camera: &CameraUbo) -> RenderResult<()> {
        let buffer = self.camera_buffers.get(slot).ok_or_else(|| {
            RenderError::Scene(format!("no camera buffer for frame slot {slot}"))
        })?;
        buffer.write_data(0, bytemuck::bytes_of(camera))?;
        Ok(())
    }

    /// Set 0 for `slot`.
    pub fn frame_set(&self, slot: usize) -> vk::DescriptorSet {
        self.frame_sets[slot % self.frame_sets.len()]
    }

    #[inline]
    pub fn set_layout(&self) -> vk::DescriptorSetLayout {
        self.set_layout.handle()
    }

    #[inline]
    pub fn vertex_address(&self) -> vk::DeviceAddress {
        self.vertex_address
    }

    #[inline]
    pub fn index_buffer(&self) -> vk::Buffer {
        self.index_buffer.handle()
    }

    #[inline]
    pub fn primitives(&self) -> &[Primitive] {
        &self.primitives
    }

    /// Material of `primitive`. Indices were checked at load time.
    pub fn material(&self, primitive: &Primitive) -> &Material {
        &self.materials[primitive.material as usize]
    }

    #[inline]
    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frame_sets.len()
    }

    pub fn descriptor_pool(&self) -> &DescriptorPool {
        &self.descriptor_pool
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn vertex_buffer(&self) -> &Buffer {
        &self.vertex_buffer
    }
}

/// Checks that the geometry can be drawn as uploaded.
pub fn validate_geometry(geometry: &SceneGeometry) -> RenderResult<()> {
    if geometry.vertices.is_empty() || geometry.indices.is_empty() {
        return Err(RenderError::Scene("scene has no geometry".into()));
    }
    if geometry.textures.len() > MAX_MATERIAL_TEXTURES as usize {
        return Err(RenderError::Scene(format!(
            "{} textures exceed the limit of {}",
            geometry.textures.len(),
            MAX_MATERIAL_TEXTURES
        )));
    }

    let texture_count = geometry.textures.len() as u32;
    for (i, material) in geometry.materials.iter().enumerate() {
        if [material.albedo, material.normal, material.params]
            .iter()
            .any(|&index| index >= texture_count)
        {
            return Err(RenderError::Scene(format!(
                "material {i} references a missing texture"
            )));
        }
    }

    let index_count = geometry.indices.len() as u64;
    let vertex_count = geometry.vertices.len() as u32;
    for (i, primitive) in geometry.primitives.iter().enumerate() {
        if primitive.material as usize >= geometry.materials.len() {
            return Err(RenderError::Scene(format!(
                "primitive {i} references missing material {}",
                primitive.material
            )));
        }
        if primitive.first_index as u64 + primitive.index_count as u64 > index_count {
            return Err(RenderError::Scene(format!(
                "primitive {i} reads past the index buffer"
            )));
        }
    }
    if geometry.indices.iter().any(|&index| index >= vertex_count) {
        return Err(RenderError::Scene("index references a missing vertex".into()));
    }
    Ok(())
}

fn upload_textures(
    device: &Arc<Device>,
    command_pool: &CommandPool,
    geometry: &SceneGeometry,
) -> RenderResult<Vec<Texture>> {
    let mut textures = Vec::with_capacity(geometry.textures.len());
    for data in &geometry.textures {
        let desc = TextureDesc::sampled_rgba8(data.name.clone(), data.width, data.height, data.srgb);
        let sampler = Sampler::linear(device.clone(), vk::SamplerAddressMode::REPEAT)?;
        textures.push(Texture::new(device.clone(), &desc)?.with_sampler(sampler));
    }

    // Staging buffers must outlive the submission.
    let mut staging = Vec::with_capacity(textures.len());
    command_pool.submit_immediate(|cmd| -> RenderResult<()> {
        let to_transfer = untracked_transition(ImageState::Undefined, ImageState::TransferDst);
        let to_sampled = untracked_transition(ImageState::TransferDst, ImageState::ShaderReadOnly);
        for (texture, data) in textures.iter().zip(&geometry.textures) {
            record_barrier(cmd, texture.image(), texture.subresource_range(), &to_transfer);
            staging.push(texture.upload_rgba8(cmd, &data.pixels)?);
            record_barrier(cmd, texture.image(), texture.subresource_range(), &to_sampled);
        }
        Ok(())
    })?;
    debug!("Uploaded {} material texture(s)", staging.len());
    drop(staging);

    Ok(textures)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_scene_is_valid() {
        assert!(validate_geometry(&SceneGeometry::demo()).is_ok());
    }

    #[test]
    fn test_empty_scene_rejected() {
        let mut scene = SceneGeometry::demo();
        scene.indices.clear();
        let err = validate_geometry(&scene).unwrap_err();
        assert!(matches!(err, RenderError::Scene(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_bad_material_index_rejected() {
        let mut scene = SceneGeometry::demo();
        scene.primitives[0].material = 99;
        assert!(validate_geometry(&scene).is_err());

        let mut scene = SceneGeometry::demo();
        scene.materials[0].albedo = 99;
        assert!(validate_geometry(&scene).is_err());
    }

    #[test]
    fn test_primitive_range_checked() {
        let mut scene = SceneGeometry::demo();
        let last = scene.primitives.len() - 1;
        scene.primitives[last].index_count += 3;
        assert!(validate_geometry(&scene).is_err());
    }
}
