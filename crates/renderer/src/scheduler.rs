//! Multi-frame-in-flight scheduling.
//!
//! # Synchronization Flow
//!
//! ```text
//! 1. Wait on the slot fence (previous use of this slot has completed)
//! 2. Acquire a surface image (signals the slot's image-available semaphore)
//! 3. Reset + begin the slot command buffer, let the recorder fill it
//! 4. Reset the fence, submit:
//!    - wait image-available at color-attachment-output
//!    - signal render-finished
//!    - signal the slot fence
//! 5. Present (waits on render-finished)
//! 6. Advance the frame counter
//! ```
//!
//! A stale acquire records nothing and latches a pending recreation that the
//! next [`FrameScheduler::draw_frame`] performs right after its fence wait.

use tracing::{debug, info, warn};

use crate::error::{RenderError, RenderResult};
use crate::frame::{
    AcquireOutcome, FrameBackend, FrameInfo, FrameRecorder, FrameStatus, PresentOutcome,
    SlotState,
};

/// Drives a [`FrameBackend`] through acquire, record, submit and present.
pub struct FrameScheduler<B: FrameBackend> {
    backend: B,
    slots: Vec<SlotState>,
    frame_counter: u64,
    framebuffer_resized: bool,
    recreate_pending: bool,
}

impl<B: FrameBackend> FrameScheduler<B> {
    pub fn new(backend: B) -> Self {
        let slots = vec![SlotState::Idle; backend.frames_in_flight().max(1)];
        info!("Frame scheduler created with {} frame slot(s)", slots.len());
        Self {
            backend,
            slots,
            frame_counter: 0,
            framebuffer_resized: false,
            recreate_pending: false,
        }
    }

    /// Runs one frame on slot `frame_counter % frames_in_flight`.
    ///
    /// # Errors
    ///
    /// Recorder errors propagate with the slot back in [`SlotState::Idle`] and
    /// a recreation pending for the next call.
    /// Submission failures are returned as [`RenderError::Submission`].
    pub fn draw_frame<R>(&mut self, recorder: &mut R) -> RenderResult<FrameStatus>
    where
        R: FrameRecorder<B::Commands>,
    {
        let slot = self.current_slot();

        self.slots[slot] = SlotState::Waiting;
        if let Err(e) = self.backend.wait_for_slot(slot) {
            self.slots[slot] = SlotState::Idle;
            return Err(e);
        }

        if self.recreate_pending {
            debug!("Performing pending swapchain recreation");
            self.slots[slot] = SlotState::Idle;
            self.recreate_swapchain(recorder)?;
        }

        self.slots[slot] = SlotState::Acquiring;
        let image_index = match self.backend.acquire_image(slot) {
            Ok(AcquireOutcome::Ready {
                image_index,
                suboptimal,
            }) => {
                if suboptimal {
                    debug!("Acquired image {} from a suboptimal swapchain", image_index);
                }
                image_index
            }
            Ok(AcquireOutcome::OutOfDate) => {
                debug!("Swapchain out of date on acquire, skipping frame");
                self.slots[slot] = SlotState::Idle;
                self.recreate_pending = true;
                return Ok(FrameStatus::Skipped);
            }
            Err(e) => {
                self.slots[slot] = SlotState::Idle;
                return Err(e);
            }
        };

        self.slots[slot] = SlotState::Recording;
        let recorded = self.backend.begin_commands(slot).and_then(|command_buffer| {
            let frame = FrameInfo {
                frame_index: slot,
                image_index,
                command_buffer,
                frame_number: self.frame_counter,
            };
            recorder.record(&frame)
        });
        if let Err(e) = recorded {
            // The acquired image is never presented and its semaphore stays
            // signalled, so the surface must be rebuilt before the next acquire.
            self.slots[slot] = SlotState::Idle;
            self.recreate_pending = true;
            return Err(e);
        }

        if let Err(e) = self.backend.submit(slot, image_index) {
            self.slots[slot] = SlotState::Idle;
            return Err(match e {
                RenderError::Submission(_) => e,
                other => RenderError::Submission(other.to_string()),
            });
        }

        // Submitted only outlives this call when present fails.
        self.slots[slot] = SlotState::Presenting;
        let presented = self.backend.present(slot, image_index);
        self.slots[slot] = if presented.is_ok() {
            SlotState::Idle
        } else {
            SlotState::Submitted
        };
        self.frame_counter += 1;

        let outcome = presented?;
        let resized = std::mem::take(&mut self.framebuffer_resized);
        if resized || outcome != PresentOutcome::Presented {
            debug!(
                "Recreating after present (outcome {:?}, resized {})",
                outcome, resized
            );
            self.recreate_swapchain(recorder)?;
            return Ok(FrameStatus::Recreated);
        }

        Ok(FrameStatus::Presented)
    }

    /// Idle-waits the device, rebuilds the surface and tells the recorder.
    ///
    /// # Errors
    ///
    /// Returns the first failure of the wait, the surface rebuild or the
    /// recorder.
    pub fn recreate_swapchain<R>(&mut self, recorder: &mut R) -> RenderResult<()>
    where
        R: FrameRecorder<B::Commands>,
    {
        self.backend.wait_idle()?;
        let surface = self.backend.recreate_surface()?;
        self.recreate_pending = false;
        self.framebuffer_resized = false;

        if surface.extent.width == 0 || surface.extent.height == 0 {
            warn!("Surface recreated with an empty extent");
        }
        recorder.recreate_swapchain(&surface)?;
        info!(
            "Swapchain recreated at {}x{}",
            surface.extent.width, surface.extent.height
        );
        Ok(())
    }

    /// Requests recreation after the next present.
    pub fn mark_framebuffer_resized(&mut self) {
        self.framebuffer_resized = true;
    }

    pub fn wait_idle(&mut self) -> RenderResult<()> {
        self.backend.wait_idle()
    }

    #[inline]
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    #[inline]
    pub fn current_slot(&self) -> usize {
        (self.frame_counter % self.slots.len() as u64) as usize
    }

    pub fn slot_state(&self, slot: usize) -> Option<SlotState> {
        self.slots.get(slot).copied()
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_recreate_pending(&self) -> bool {
        self.recreate_pending
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::SurfaceTargets;
    use ash::vk;

    #[derive(Default)]
    struct CountingBackend {
        fail_submit: bool,
        fail_present: bool,
        submits: usize,
    }

    impl FrameBackend for CountingBackend {
        type Commands = usize;

        fn frames_in_flight(&self) -> usize {
            3
        }

        fn wait_for_slot(&mut self, _slot: usize) -> RenderResult<()> {
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> RenderResult<AcquireOutcome> {
            Ok(AcquireOutcome::Ready {
                image_index: slot as u32,
                suboptimal: false,
            })
        }

        fn begin_commands(&mut self, slot: usize) -> RenderResult<usize> {
            Ok(slot)
        }

        fn submit(&mut self, _slot: usize, _image_index: u32) -> RenderResult<()> {
            if self.fail_submit {
                return Err(RenderError::Rhi(deferred_rhi::RhiError::VulkanError(
                    vk::Result::ERROR_DEVICE_LOST,
                )));
            }
            self.submits += 1;
            Ok(())
        }

        fn present(&mut self, _slot: usize, _image_index: u32) -> RenderResult<PresentOutcome> {
            if self.fail_present {
                return Err(RenderError::Rhi(deferred_rhi::RhiError::VulkanError(
                    vk::Result::ERROR_SURFACE_LOST_KHR,
                )));
            }
            Ok(PresentOutcome::Presented)
        }

        fn wait_idle(&mut self) -> RenderResult<()> {
            Ok(())
        }

        fn recreate_surface(&mut self) -> RenderResult<SurfaceTargets> {
            Ok(SurfaceTargets::default())
        }
    }

    #[derive(Default)]
    struct SlotLog {
        slots: Vec<usize>,
        recreated: usize,
        fail: bool,
    }

    impl FrameRecorder<usize> for SlotLog {
        fn record(&mut self, frame: &FrameInfo<usize>) -> RenderResult<()> {
            if self.fail {
                return Err(RenderError::MissingDependency("hdr".into()));
            }
            self.slots.push(frame.command_buffer);
            Ok(())
        }

        fn recreate_swapchain(&mut self, _surface: &SurfaceTargets) -> RenderResult<()> {
            self.recreated += 1;
            Ok(())
        }
    }

    #[test]
    fn test_three_slots_rotate() {
        let mut scheduler = FrameScheduler::new(CountingBackend::default());
        let mut recorder = SlotLog::default();
        for _ in 0..7 {
            assert_eq!(
                scheduler.draw_frame(&mut recorder).unwrap(),
                FrameStatus::Presented
            );
        }
        assert_eq!(recorder.slots, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(scheduler.current_slot(), 1);
    }

    #[test]
    fn test_recorder_error_returns_slot_to_idle() {
        let mut scheduler = FrameScheduler::new(CountingBackend::default());
        let mut recorder = SlotLog {
            fail: true,
            ..Default::default()
        };
        let err = scheduler.draw_frame(&mut recorder).unwrap_err();
        assert!(matches!(err, RenderError::MissingDependency(_)));
        assert_eq!(scheduler.slot_state(0), Some(SlotState::Idle));
        assert_eq!(scheduler.frame_counter(), 0);
        assert_eq!(scheduler.backend().submits, 0);
        assert!(scheduler.is_recreate_pending());
    }

    #[test]
    fn test_submit_failure_is_fatal_submission_error() {
        let mut scheduler = FrameScheduler::new(CountingBackend {
            fail_submit: true,
            ..Default::default()
        });
        let err = scheduler
            .draw_frame(&mut SlotLog::default())
            .unwrap_err();
        assert!(matches!(err, RenderError::Submission(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_present_failure_leaves_slot_submitted() {
        let mut scheduler = FrameScheduler::new(CountingBackend {
            fail_present: true,
            ..Default::default()
        });
        let mut recorder = SlotLog::default();
        assert!(scheduler.draw_frame(&mut recorder).is_err());
        assert_eq!(scheduler.slot_state(0), Some(SlotState::Submitted));
        assert_eq!(scheduler.backend().submits, 1);
        assert_eq!(scheduler.frame_counter(), 1);

        scheduler.backend_mut().fail_present = false;
        assert_eq!(
            scheduler.draw_frame(&mut recorder).unwrap(),
            FrameStatus::Presented
        );
        assert_eq!(scheduler.slot_state(1), Some(SlotState::Idle));
    }

    #[test]
    fn test_resize_flag_recreates_once() {
        let mut scheduler = FrameScheduler::new(CountingBackend::default());
        let mut recorder = SlotLog::default();
        scheduler.mark_framebuffer_resized();
        assert_eq!(
            scheduler.draw_frame(&mut recorder).unwrap(),
            FrameStatus::Recreated
        );
        assert_eq!(
            scheduler.draw_frame(&mut recorder).unwrap(),
            FrameStatus::Presented
        );
        assert_eq!(recorder.recreated, 1);
    }
}
