//! Cross-pass resource table.

use std::collections::HashMap;

use ash::vk;
use tracing::debug;

use deferred_rhi::command::CommandBuffer;
use deferred_rhi::texture::TextureRef;

use crate::error::{RenderError, RenderResult};
use crate::layout::{ImageState, LayoutTracker, LayoutTransition, TrackedImage, record_barrier};

/// Non-owning references to the images passes hand to each other, with
/// their tracked layouts.
///
/// Each [`TrackedImage`] has one writer pass. Publishing the same image from
/// a second pass panics.
#[derive(Debug, Default)]
pub struct PassDependencies {
    textures: HashMap<(TrackedImage, usize), TextureRef>,
    writers: HashMap<TrackedImage, &'static str>,
    pub layouts: LayoutTracker,
}

impl PassDependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `texture` as `image` for `slot` and registers it as
    /// [`ImageState::Undefined`].
    ///
    /// Republishing from the same writer (after a reallocation) replaces the
    /// entry.
    ///
    /// # Panics
    ///
    /// Panics if another pass already writes `image`.
    pub fn publish(
        &mut self,
        writer: &'static str,
        image: TrackedImage,
        slot: usize,
        texture: TextureRef,
    ) {
        match self.writers.get(&image) {
            Some(existing) if *existing != writer => panic!(
                "{} is written by '{}', '{}' cannot publish it",
                image.name(),
                existing,
                writer
            ),
            Some(_) => {}
            None => {
                self.writers.insert(image, writer);
            }
        }

        debug!(
            "'{}' published {} for slot {} ({}x{})",
            writer,
            image.name(),
            slot,
            texture.extent.width,
            texture.extent.height
        );
        self.textures.insert((image, image.slot_key(slot)), texture);
        self.layouts.register(image, slot, ImageState::Undefined);
    }

    /// Looks up a published image.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::MissingDependency`] if no pass published it.
    pub fn get(&self, image: TrackedImage, slot: usize) -> RenderResult<TextureRef> {
        self.textures
            .get(&(image, image.slot_key(slot)))
            .copied()
            .ok_or_else(|| {
                RenderError::MissingDependency(format!("{} (slot {})", image.name(), slot))
            })
    }

    pub fn writer(&self, image: TrackedImage) -> Option<&'static str> {
        self.writers.get(&image).copied()
    }

    /// Asserts the layout a consumer expects.
    ///
    /// # Panics
    ///
    /// Panics on mismatch.
    pub fn require_layout(&self, image: TrackedImage, slot: usize, expected: ImageState) {
        self.layouts.require(image, slot, expected);
    }

    /// Transitions a published image and records the barrier into `cmd`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::MissingDependency`] if the image was never
    /// published.
    pub fn transition(
        &mut self,
        cmd: &CommandBuffer,
        image: TrackedImage,
        slot: usize,
        new: ImageState,
    ) -> RenderResult<LayoutTransition> {
        let texture = self.get(image, slot)?;
        let transition = self.layouts.transition(image, slot, new);
        record_barrier(cmd, texture.image, texture.subresource_range(), &transition);
        Ok(transition)
    }

    /// Extent of a published per-slot image.
    pub fn extent(&self, image: TrackedImage, slot: usize) -> Option<vk::Extent2D> {
        self.textures
            .get(&(image, image.slot_key(slot)))
            .map(|texture| texture.extent)
    }

    /// Resets every per-slot image of `slot` to [`ImageState::Undefined`].
    ///
    /// Used when a frame's recording is abandoned: its barriers never reach
    /// the GPU, so the tracked states no longer describe the images.
    pub fn discard_slot(&mut self, slot: usize) {
        let images: Vec<TrackedImage> = self
            .textures
            .keys()
            .filter(|(image, key)| image.is_per_frame() && *key == slot)
            .map(|(image, _)| *image)
            .collect();
        for image in images {
            self.layouts.register(image, slot, ImageState::Undefined);
        }
        debug!("Discarded tracked layouts of slot {}", slot);
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texture(width: u32, height: u32) -> TextureRef {
        TextureRef {
            image: vk::Image::null(),
            view: vk::ImageView::null(),
            storage_view: None,
            sampler: None,
            format: vk::Format::R16G16B16A16_SFLOAT,
            extent: vk::Extent2D { width, height },
            aspect: vk::ImageAspectFlags::COLOR,
            layer_count: 1,
        }
    }

    #[test]
    fn test_missing_dependency_is_error() {
        let deps = PassDependencies::new();
        let err = deps.get(TrackedImage::Hdr, 0).unwrap_err();
        assert!(matches!(err, RenderError::MissingDependency(ref name) if name.contains("hdr")));
    }

    #[test]
    fn test_publish_registers_undefined() {
        let mut deps = PassDependencies::new();
        deps.publish("lighting", TrackedImage::Hdr, 1, texture(8, 8));
        deps.require_layout(TrackedImage::Hdr, 1, ImageState::Undefined);
        assert_eq!(deps.writer(TrackedImage::Hdr), Some("lighting"));
        assert_eq!(deps.extent(TrackedImage::Hdr, 1).unwrap().width, 8);
    }

    #[test]
    fn test_same_writer_may_republish() {
        let mut deps = PassDependencies::new();
        deps.publish("gbuffer", TrackedImage::Albedo, 0, texture(8, 8));
        deps.layouts
            .transition(TrackedImage::Albedo, 0, ImageState::ColorAttachment);
        deps.publish("gbuffer", TrackedImage::Albedo, 0, texture(16, 9));
        assert_eq!(deps.get(TrackedImage::Albedo, 0).unwrap().extent.height, 9);
        deps.require_layout(TrackedImage::Albedo, 0, ImageState::Undefined);
        assert_eq!(deps.len(), 1);
    }

    #[test]
    fn test_global_images_visible_from_every_slot() {
        let mut deps = PassDependencies::new();
        deps.publish("environment", TrackedImage::Irradiance, 0, texture(32, 32));
        assert!(deps.get(TrackedImage::Irradiance, 2).is_ok());
    }

    #[test]
    fn test_discard_slot_leaves_other_slots() {
        let mut deps = PassDependencies::new();
        for slot in 0..2 {
            deps.publish("gbuffer", TrackedImage::Albedo, slot, texture(8, 8));
            deps.layouts
                .transition(TrackedImage::Albedo, slot, ImageState::ColorAttachment);
        }
        deps.publish("environment", TrackedImage::Environment, 0, texture(8, 8));
        deps.layouts
            .transition(TrackedImage::Environment, 0, ImageState::General);

        deps.discard_slot(0);
        deps.require_layout(TrackedImage::Albedo, 0, ImageState::Undefined);
        deps.require_layout(TrackedImage::Albedo, 1, ImageState::ColorAttachment);
        deps.require_layout(TrackedImage::Environment, 0, ImageState::General);
    }

    #[test]
    #[should_panic(expected = "cannot publish")]
    fn test_second_writer_panics() {
        let mut deps = PassDependencies::new();
        deps.publish("lighting", TrackedImage::Hdr, 0, texture(8, 8));
        deps.publish("tone_mapping", TrackedImage::Hdr, 0, texture(8, 8));
    }
}
