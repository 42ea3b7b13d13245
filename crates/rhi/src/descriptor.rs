//! Descriptor set layouts, pools and writes.
//!
//! - [`DescriptorSetLayout`] defines the bindings a shader expects
//! - [`DescriptorPool`] allocates sets; each pass owns a pool sized for its
//!   own per-slot sets
//! - [`DescriptorWriter`] batches buffer and image writes for one set
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use deferred_rhi::device::Device;
//! use deferred_rhi::descriptor::{DescriptorBindingBuilder, DescriptorPool, DescriptorSetLayout};
//!
//! # fn example(device: Arc<Device>) -> Result<(), deferred_rhi::RhiError> {
//! let layout = DescriptorSetLayout::new(
//!     device.clone(),
//!     &[DescriptorBindingBuilder::uniform_buffer(0, vk::ShaderStageFlags::VERTEX)],
//! )?;
//! let pool = DescriptorPool::new(
//!     device.clone(),
//!     2,
//!     &[vk::DescriptorPoolSize::default()
//!         .ty(vk::DescriptorType::UNIFORM_BUFFER)
//!         .descriptor_count(2)],
//! )?;
//! let sets = pool.allocate(&[layout.handle(); 2])?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Descriptor set layout wrapper.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    /// Creates a layout from plain bindings.
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn new(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );
        Ok(Self { device, layout })
    }

    /// Creates a layout with per-binding flags, e.g. `PARTIALLY_BOUND` for a
    /// texture array that is only filled up to the scene's material count.
    ///
    /// `flags` must have one entry per binding.
    pub fn with_binding_flags(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding],
        flags: &[vk::DescriptorBindingFlags],
    ) -> RhiResult<Self> {
        let mut flags_info =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(flags);
        let create_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(bindings)
            .push_next(&mut flags_info);
        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!(
            "Created descriptor set layout with {} flagged binding(s)",
            bindings.len()
        );
        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
        debug!("Destroyed descriptor set layout");
    }
}

/// Descriptor pool wrapper. Sets are released when the pool is destroyed.
pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
    max_sets: u32,
}

impl DescriptorPool {
    pub fn new(
        device: Arc<Device>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);
        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };

        debug!(
            "Created descriptor pool: max_sets={}, pool_sizes={}",
            max_sets,
            pool_sizes.len()
        );

        Ok(Self {
            device,
            pool,
            max_sets,
        })
    }

    /// Allocates one set per layout handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool is exhausted.
    pub fn allocate(
        &self,
        layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);
        let sets = unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)? };
        debug!("Allocated {} descriptor set(s)", sets.len());
        Ok(sets)
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None);
        }
        debug!("Destroyed descriptor pool");
    }
}

/// Layout binding constructors.
pub struct DescriptorBindingBuilder;

impl DescriptorBindingBuilder {
    #[inline]
    pub fn uniform_buffer(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(stage_flags)
    }

    #[inline]
    pub fn combined_image_sampler(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        Self::combined_image_sampler_array(binding, 1, stage_flags)
    }

    #[inline]
    pub fn combined_image_sampler_array(
        binding: u32,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(count)
            .stage_flags(stage_flags)
    }

    #[inline]
    pub fn storage_image(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
            .descriptor_count(1)
            .stage_flags(stage_flags)
    }
}

/// Pending writes for a single descriptor set.
pub struct DescriptorWriter {
    set: vk::DescriptorSet,
    buffers: Vec<(u32, vk::DescriptorBufferInfo)>,
    images: Vec<(u32, vk::DescriptorType, Vec<vk::DescriptorImageInfo>)>,
}

impl DescriptorWriter {
    pub fn new(set: vk::DescriptorSet) -> Self {
        Self {
            set,
            buffers: Vec::new(),
            images: Vec::new(),
        }
    }

    /// Binds the whole of `buffer` as a uniform buffer.
    pub fn uniform_buffer(mut self, binding: u32, buffer: vk::Buffer) -> Self {
        let info = vk::DescriptorBufferInfo::default()
            .buffer(buffer)
            .offset(0)
            .range(vk::WHOLE_SIZE);
        self.buffers.push((binding, info));
        self
    }

    pub fn sampled_image(
        self,
        binding: u32,
        sampler: vk::Sampler,
        view: vk::ImageView,
        layout: vk::ImageLayout,
    ) -> Self {
        self.sampled_images(binding, &[(sampler, view)], layout)
    }

    /// Writes consecutive array elements starting at element zero.
    pub fn sampled_images(
        mut self,
        binding: u32,
        images: &[(vk::Sampler, vk::ImageView)],
        layout: vk::ImageLayout,
    ) -> Self {
        if images.is_empty() {
            return self;
        }
        let infos = images
            .iter()
            .map(|&(sampler, view)| {
                vk::DescriptorImageInfo::default()
                    .sampler(sampler)
                    .image_view(view)
                    .image_layout(layout)
            })
            .collect();
        self.images
            .push((binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, infos));
        self
    }

    /// Binds a storage image, which is accessed in `GENERAL` layout.
    pub fn storage_image(mut self, binding: u32, view: vk::ImageView) -> Self {
        let info = vk::DescriptorImageInfo::default()
            .image_view(view)
            .image_layout(vk::ImageLayout::GENERAL);
        self.images
            .push((binding, vk::DescriptorType::STORAGE_IMAGE, vec![info]));
        self
    }

    /// Number of pending descriptor writes.
    pub fn len(&self) -> usize {
        self.buffers.len() + self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies all pending writes.
    pub fn commit(self, device: &Device) {
        if self.is_empty() {
            return;
        }

        let mut writes = Vec::with_capacity(self.len());
        for (binding, info) in &self.buffers {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(self.set)
                    .dst_binding(*binding)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(std::slice::from_ref(info)),
            );
        }
        for (binding, ty, infos) in &self.images {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(self.set)
                    .dst_binding(*binding)
                    .descriptor_type(*ty)
                    .image_info(infos),
            );
        }

        unsafe {
            device.handle().update_descriptor_sets(&writes, &[]);
        }
        debug!("Updated {} descriptor binding(s)", writes.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampler_array_binding() {
        let binding = DescriptorBindingBuilder::combined_image_sampler_array(
            1,
            64,
            vk::ShaderStageFlags::FRAGMENT,
        );
        assert_eq!(binding.binding, 1);
        assert_eq!(binding.descriptor_count, 64);
        assert_eq!(
            binding.descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
    }

    #[test]
    fn test_storage_image_binding() {
        let binding = DescriptorBindingBuilder::storage_image(0, vk::ShaderStageFlags::COMPUTE);
        assert_eq!(binding.descriptor_type, vk::DescriptorType::STORAGE_IMAGE);
        assert_eq!(binding.stage_flags, vk::ShaderStageFlags::COMPUTE);
    }

    #[test]
    fn test_writer_collects_writes() {
        let writer = DescriptorWriter::new(vk::DescriptorSet::null())
            .uniform_buffer(0, vk::Buffer::null())
            .sampled_images(
                1,
                &[
                    (vk::Sampler::null(), vk::ImageView::null()),
                    (vk::Sampler::null(), vk::ImageView::null()),
                ],
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
            .sampled_images(2, &[], vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(writer.len(), 2);
        assert_eq!(writer.images[0].2.len(), 2);
    }

    #[test]
    fn test_storage_image_uses_general_layout() {
        let writer = DescriptorWriter::new(vk::DescriptorSet::null())
            .storage_image(0, vk::ImageView::null());
        assert_eq!(writer.images[0].2[0].image_layout, vk::ImageLayout::GENERAL);
    }
}
