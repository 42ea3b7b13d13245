//! Frame-slot vocabulary shared by the scheduler and its backends.
//!
//! The scheduling protocol is written against two traits:
//! - [`FrameBackend`]: the presentation side (fences, semaphores, swapchain)
//! - [`FrameRecorder`]: whatever records a frame's commands, usually the
//!   pass pipeline
//!
//! [`crate::frame_manager::SwapchainFrames`] is the Vulkan backend.

use ash::vk;

use crate::error::RenderResult;

/// What a recorder sees for one frame.
#[derive(Clone, Debug)]
pub struct FrameInfo<C> {
    /// Frame slot, `frame_number % frames_in_flight`
    pub frame_index: usize,
    /// Acquired surface image
    pub image_index: u32,
    /// The slot's command buffer, already reset and begun
    pub command_buffer: C,
    /// Frames presented before this one
    pub frame_number: u64,
}

/// Result of asking the surface for an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Ready { image_index: u32, suboptimal: bool },
    /// The surface changed; nothing was acquired
    OutOfDate,
}

/// Result of queueing an image for presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// What [`crate::FrameScheduler::draw_frame`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// Recorded, submitted and presented
    Presented,
    /// Acquire found a stale surface; nothing was recorded
    Skipped,
    /// Presented, then the surface and every pass were recreated
    Recreated,
}

/// Where a frame slot is in its cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SlotState {
    #[default]
    Idle,
    Waiting,
    Acquiring,
    Recording,
    /// Work queued but the image was not presented; kept until the slot's
    /// next fence wait
    Submitted,
    Presenting,
}

/// Presentable images and their shared format and extent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SurfaceTargets {
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
}

impl SurfaceTargets {
    pub fn image(&self, index: u32) -> Option<(vk::Image, vk::ImageView)> {
        let index = index as usize;
        Some((*self.images.get(index)?, *self.views.get(index)?))
    }
}

/// Presentation side of the frame loop.
///
/// Every method takes the slot it acts on; the scheduler owns the slot
/// rotation.
pub trait FrameBackend {
    /// Handle passed to the recorder.
    type Commands: Clone;

    fn frames_in_flight(&self) -> usize;

    /// Blocks until the slot's previous submission has completed.
    fn wait_for_slot(&mut self, slot: usize) -> RenderResult<()>;

    fn acquire_image(&mut self, slot: usize) -> RenderResult<AcquireOutcome>;

    /// Resets and begins the slot's command buffer.
    fn begin_commands(&mut self, slot: usize) -> RenderResult<Self::Commands>;

    /// Ends the command buffer, resets the slot fence and submits.
    fn submit(&mut self, slot: usize, image_index: u32) -> RenderResult<()>;

    fn present(&mut self, slot: usize, image_index: u32) -> RenderResult<PresentOutcome>;

    fn wait_idle(&mut self) -> RenderResult<()>;

    /// Rebuilds the surface images for the current window size.
    fn recreate_surface(&mut self) -> RenderResult<SurfaceTargets>;
}

/// Records one frame and reacts to surface recreation.
pub trait FrameRecorder<C> {
    fn record(&mut self, frame: &FrameInfo<C>) -> RenderResult<()>;

    fn recreate_swapchain(&mut self, surface: &SurfaceTargets) -> RenderResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_image_lookup() {
        let targets = SurfaceTargets {
            format: vk::Format::B8G8R8A8_SRGB,
            extent: vk::Extent2D {
                width: 4,
                height: 4,
            },
            images: vec![vk::Image::null(); 2],
            views: vec![vk::ImageView::null(); 2],
        };
        assert!(targets.image(1).is_some());
        assert!(targets.image(2).is_none());
    }

    #[test]
    fn test_slot_defaults_to_idle() {
        assert_eq!(SlotState::default(), SlotState::Idle);
    }
}
