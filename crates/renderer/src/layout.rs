//! Image layout tracking across passes and frame slots.
//!
//! Each tracked image has one [`ImageState`] per frame slot. Passes ask the
//! tracker for a transition, and the tracker answers with the synchronization2
//! masks for that exact (old, new) pair. The rule table is closed: a pair it
//! does not list means passes run in the wrong order, so the tracker panics
//! instead of guessing a barrier.
//!
//! Depth lifecycle for one slot:
//!
//! ```text
//! depth:      Undefined -> DepthAttachment -> General -> TransferSrc
//!             TransferSrc -> DepthAttachment (next use of the slot)
//! depth copy: Undefined | DepthReadOnly -> TransferDst -> DepthReadOnly
//! ```

use std::collections::HashMap;

use ash::vk;
use tracing::trace;

use deferred_rhi::command::CommandBuffer;

/// Access mode of an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageState {
    Undefined,
    ColorAttachment,
    DepthAttachment,
    /// Storage writes and the depth hand-off before its copy
    General,
    TransferSrc,
    TransferDst,
    ShaderReadOnly,
    /// Depth that is tested without writes and sampled
    DepthReadOnly,
    Present,
}

impl ImageState {
    pub fn layout(self) -> vk::ImageLayout {
        match self {
            ImageState::Undefined => vk::ImageLayout::UNDEFINED,
            ImageState::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ImageState::DepthAttachment => vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            ImageState::General => vk::ImageLayout::GENERAL,
            ImageState::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ImageState::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ImageState::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ImageState::DepthReadOnly => vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL,
            ImageState::Present => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }
}

/// Cross-pass images whose layout is tracked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrackedImage {
    Depth,
    DepthCopy,
    Albedo,
    Normal,
    Params,
    Hdr,
    Environment,
    Irradiance,
}

impl TrackedImage {
    /// Per-slot images have one state per frame slot; the precomputed maps
    /// are shared by all slots.
    pub fn is_per_frame(self) -> bool {
        !matches!(self, TrackedImage::Environment | TrackedImage::Irradiance)
    }

    /// Slot key used for storage: global images always use slot 0.
    pub fn slot_key(self, slot: usize) -> usize {
        if self.is_per_frame() { slot } else { 0 }
    }

    pub fn name(self) -> &'static str {
        match self {
            TrackedImage::Depth => "depth",
            TrackedImage::DepthCopy => "depth copy",
            TrackedImage::Albedo => "albedo",
            TrackedImage::Normal => "normal",
            TrackedImage::Params => "params",
            TrackedImage::Hdr => "hdr",
            TrackedImage::Environment => "environment",
            TrackedImage::Irradiance => "irradiance",
        }
    }
}

/// Stage and access masks on both sides of a barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BarrierMasks {
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
}

/// A resolved transition, ready to be recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutTransition {
    pub old: ImageState,
    pub new: ImageState,
    pub masks: BarrierMasks,
}

impl LayoutTransition {
    pub fn barrier(
        &self,
        image: vk::Image,
        range: vk::ImageSubresourceRange,
    ) -> vk::ImageMemoryBarrier2<'static> {
        vk::ImageMemoryBarrier2::default()
            .src_stage_mask(self.masks.src_stage)
            .src_access_mask(self.masks.src_access)
            .dst_stage_mask(self.masks.dst_stage)
            .dst_access_mask(self.masks.dst_access)
            .old_layout(self.old.layout())
            .new_layout(self.new.layout())
            .image(image)
            .subresource_range(range)
    }
}

/// Barrier masks for the supported transitions, `None` for any other pair.
pub fn transition_masks(old: ImageState, new: ImageState) -> Option<BarrierMasks> {
    use ImageState as S;
    type Stage = vk::PipelineStageFlags2;
    type Access = vk::AccessFlags2;

    let depth_tests = Stage::EARLY_FRAGMENT_TESTS | Stage::LATE_FRAGMENT_TESTS;
    let depth_rw =
        Access::DEPTH_STENCIL_ATTACHMENT_READ | Access::DEPTH_STENCIL_ATTACHMENT_WRITE;
    let sampled_stages = Stage::FRAGMENT_SHADER | Stage::COMPUTE_SHADER;

    let (src_stage, src_access, dst_stage, dst_access) = match (old, new) {
        (S::Undefined, S::DepthAttachment) => {
            (Stage::TOP_OF_PIPE, Access::NONE, depth_tests, depth_rw)
        }
        (S::Undefined, S::ColorAttachment) => (
            Stage::COLOR_ATTACHMENT_OUTPUT,
            Access::NONE,
            Stage::COLOR_ATTACHMENT_OUTPUT,
            Access::COLOR_ATTACHMENT_WRITE,
        ),
        (S::Undefined, S::TransferDst) => (
            Stage::TOP_OF_PIPE,
            Access::NONE,
            Stage::COPY,
            Access::TRANSFER_WRITE,
        ),
        (S::Undefined, S::General) => (
            Stage::TOP_OF_PIPE,
            Access::NONE,
            Stage::COMPUTE_SHADER,
            Access::SHADER_STORAGE_WRITE,
        ),
        (S::DepthAttachment, S::General) => (
            Stage::LATE_FRAGMENT_TESTS,
            Access::DEPTH_STENCIL_ATTACHMENT_WRITE,
            Stage::COPY,
            Access::TRANSFER_READ,
        ),
        (S::General, S::TransferSrc) => (
            Stage::COPY,
            Access::NONE,
            Stage::COPY,
            Access::TRANSFER_READ,
        ),
        (S::General, S::ShaderReadOnly) => (
            Stage::COMPUTE_SHADER,
            Access::SHADER_STORAGE_WRITE,
            sampled_stages,
            Access::SHADER_SAMPLED_READ,
        ),
        (S::TransferSrc, S::DepthAttachment) => {
            (Stage::COPY, Access::NONE, depth_tests, depth_rw)
        }
        (S::TransferDst, S::DepthReadOnly) => (
            Stage::COPY,
            Access::TRANSFER_WRITE,
            depth_tests | Stage::FRAGMENT_SHADER,
            Access::DEPTH_STENCIL_ATTACHMENT_READ | Access::SHADER_SAMPLED_READ,
        ),
        (S::TransferDst, S::ShaderReadOnly) => (
            Stage::COPY,
            Access::TRANSFER_WRITE,
            sampled_stages,
            Access::SHADER_SAMPLED_READ,
        ),
        (S::DepthReadOnly, S::TransferDst) => (
            depth_tests | Stage::FRAGMENT_SHADER,
            Access::NONE,
            Stage::COPY,
            Access::TRANSFER_WRITE,
        ),
        (S::ColorAttachment, S::ShaderReadOnly) => (
            Stage::COLOR_ATTACHMENT_OUTPUT,
            Access::COLOR_ATTACHMENT_WRITE,
            Stage::FRAGMENT_SHADER,
            Access::SHADER_SAMPLED_READ,
        ),
        (S::ColorAttachment, S::Present) => (
            Stage::COLOR_ATTACHMENT_OUTPUT,
            Access::COLOR_ATTACHMENT_WRITE,
            Stage::BOTTOM_OF_PIPE,
            Access::NONE,
        ),
        (S::ShaderReadOnly, S::ColorAttachment) => (
            Stage::FRAGMENT_SHADER,
            Access::NONE,
            Stage::COLOR_ATTACHMENT_OUTPUT,
            Access::COLOR_ATTACHMENT_WRITE,
        ),
        _ => return None,
    };

    Some(BarrierMasks {
        src_stage,
        src_access,
        dst_stage,
        dst_access,
    })
}

/// Resolves a transition for an image that is not tracked (the acquired
/// swapchain image).
///
/// # Panics
///
/// Panics if the pair is not in the rule table.
pub fn untracked_transition(old: ImageState, new: ImageState) -> LayoutTransition {
    match transition_masks(old, new) {
        Some(masks) => LayoutTransition { old, new, masks },
        None => panic!("unsupported layout transition: {old:?} -> {new:?}"),
    }
}

/// Records one image barrier for `transition`.
pub fn record_barrier(
    cmd: &CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    transition: &LayoutTransition,
) {
    cmd.image_barriers(&[transition.barrier(image, range)]);
}

/// Current state of every tracked image, per frame slot.
#[derive(Debug, Default)]
pub struct LayoutTracker {
    states: HashMap<(TrackedImage, usize), ImageState>,
}

impl LayoutTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an image in `state`, replacing any previous entry.
    ///
    /// Called with [`ImageState::Undefined`] whenever an image is
    /// (re)allocated.
    pub fn register(&mut self, image: TrackedImage, slot: usize, state: ImageState) {
        self.states.insert((image, image.slot_key(slot)), state);
    }

    pub fn state(&self, image: TrackedImage, slot: usize) -> Option<ImageState> {
        self.states.get(&(image, image.slot_key(slot))).copied()
    }

    /// Moves `image` to `new` and returns the barrier to record.
    ///
    /// # Panics
    ///
    /// Panics if the image was never registered or the transition is not in
    /// the rule table.
    pub fn transition(
        &mut self,
        image: TrackedImage,
        slot: usize,
        new: ImageState,
    ) -> LayoutTransition {
        let key = (image, image.slot_key(slot));
        let Some(old) = self.states.get(&key).copied() else {
            panic!("layout transition on unregistered image: {} (slot {slot})", image.name());
        };
        let Some(masks) = transition_masks(old, new) else {
            panic!(
                "unsupported layout transition for {} (slot {slot}): {old:?} -> {new:?}",
                image.name()
            );
        };

        trace!("{} slot {}: {:?} -> {:?}", image.name(), slot, old, new);
        self.states.insert(key, new);
        LayoutTransition { old, new, masks }
    }

    /// Asserts that `image` is currently in `expected`.
    ///
    /// # Panics
    ///
    /// Panics on any other state, including unregistered images.
    pub fn require(&self, image: TrackedImage, slot: usize, expected: ImageState) {
        let actual = self.state(image, slot);
        assert_eq!(
            actual,
            Some(expected),
            "{} (slot {slot}) is in {actual:?}, expected {expected:?}",
            image.name()
        );
    }

    /// Drops every entry for `image`; used when its owner is destroyed.
    pub fn forget(&mut self, image: TrackedImage) {
        self.states.retain(|(tracked, _), _| *tracked != image);
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_depth_frame(tracker: &mut LayoutTracker, slot: usize) -> Vec<(ImageState, ImageState)> {
        let mut steps = Vec::new();
        let mut step = |tracker: &mut LayoutTracker, image, state| {
            let t = tracker.transition(image, slot, state);
            steps.push((t.old, t.new));
        };

        let depth_state = tracker.state(TrackedImage::Depth, slot);
        if depth_state == Some(ImageState::Undefined) || depth_state == Some(ImageState::TransferSrc)
        {
            step(tracker, TrackedImage::Depth, ImageState::DepthAttachment);
        }
        step(tracker, TrackedImage::Depth, ImageState::General);
        step(tracker, TrackedImage::Depth, ImageState::TransferSrc);
        step(tracker, TrackedImage::DepthCopy, ImageState::TransferDst);
        step(tracker, TrackedImage::DepthCopy, ImageState::DepthReadOnly);
        steps
    }

    #[test]
    fn test_depth_chain_over_two_frames() {
        let mut tracker = LayoutTracker::new();
        tracker.register(TrackedImage::Depth, 0, ImageState::Undefined);
        tracker.register(TrackedImage::DepthCopy, 0, ImageState::Undefined);

        let first = run_depth_frame(&mut tracker, 0);
        assert_eq!(first[0], (ImageState::Undefined, ImageState::DepthAttachment));

        let second = run_depth_frame(&mut tracker, 0);
        assert_eq!(second[0], (ImageState::TransferSrc, ImageState::DepthAttachment));
        assert_eq!(second[3], (ImageState::DepthReadOnly, ImageState::TransferDst));

        tracker.require(TrackedImage::Depth, 0, ImageState::TransferSrc);
        tracker.require(TrackedImage::DepthCopy, 0, ImageState::DepthReadOnly);
    }

    #[test]
    fn test_slots_are_independent() {
        let mut tracker = LayoutTracker::new();
        for slot in 0..2 {
            tracker.register(TrackedImage::Albedo, slot, ImageState::Undefined);
        }
        tracker.transition(TrackedImage::Albedo, 0, ImageState::ColorAttachment);
        assert_eq!(
            tracker.state(TrackedImage::Albedo, 1),
            Some(ImageState::Undefined)
        );
    }

    #[test]
    fn test_global_images_share_one_state() {
        let mut tracker = LayoutTracker::new();
        tracker.register(TrackedImage::Irradiance, 0, ImageState::Undefined);
        tracker.transition(TrackedImage::Irradiance, 0, ImageState::General);
        tracker.transition(TrackedImage::Irradiance, 0, ImageState::ShaderReadOnly);
        tracker.require(TrackedImage::Irradiance, 1, ImageState::ShaderReadOnly);
    }

    #[test]
    #[should_panic(expected = "unsupported layout transition")]
    fn test_unsupported_pair_panics() {
        let mut tracker = LayoutTracker::new();
        tracker.register(TrackedImage::Depth, 0, ImageState::DepthAttachment);
        tracker.transition(TrackedImage::Depth, 0, ImageState::Present);
    }

    #[test]
    #[should_panic(expected = "unregistered image")]
    fn test_unregistered_image_panics() {
        let mut tracker = LayoutTracker::new();
        tracker.transition(TrackedImage::Hdr, 0, ImageState::ColorAttachment);
    }

    #[test]
    #[should_panic(expected = "expected ShaderReadOnly")]
    fn test_require_mismatch_panics() {
        let mut tracker = LayoutTracker::new();
        tracker.register(TrackedImage::Hdr, 0, ImageState::Undefined);
        tracker.require(TrackedImage::Hdr, 0, ImageState::ShaderReadOnly);
    }

    #[test]
    fn test_register_resets_after_reallocation() {
        let mut tracker = LayoutTracker::new();
        tracker.register(TrackedImage::Normal, 0, ImageState::Undefined);
        tracker.transition(TrackedImage::Normal, 0, ImageState::ColorAttachment);
        tracker.transition(TrackedImage::Normal, 0, ImageState::ShaderReadOnly);
        tracker.register(TrackedImage::Normal, 0, ImageState::Undefined);
        let t = tracker.transition(TrackedImage::Normal, 0, ImageState::ColorAttachment);
        assert_eq!(t.old, ImageState::Undefined);
    }

    #[test]
    fn test_present_transition_masks() {
        let t = untracked_transition(ImageState::ColorAttachment, ImageState::Present);
        assert_eq!(t.new.layout(), vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(t.masks.dst_access, vk::AccessFlags2::NONE);
        assert!(transition_masks(ImageState::Present, ImageState::ShaderReadOnly).is_none());
    }

    #[test]
    fn test_forget_removes_all_slots() {
        let mut tracker = LayoutTracker::new();
        tracker.register(TrackedImage::Hdr, 0, ImageState::Undefined);
        tracker.register(TrackedImage::Hdr, 1, ImageState::Undefined);
        tracker.register(TrackedImage::Depth, 0, ImageState::Undefined);
        tracker.forget(TrackedImage::Hdr);
        assert_eq!(tracker.len(), 1);
    }
}
