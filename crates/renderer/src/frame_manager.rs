//! Vulkan frame backend.
//!
//! [`SwapchainFrames`] owns the swapchain, one command pool and a fixed set of
//! frame slots. Each slot has its own command buffer, semaphores and fence,
//! all created once at startup. Semaphores are recreated together with the
//! swapchain so no signal from the old swapchain can leak into the new one.
//!
//! ```text
//! slot i: [command buffer] [image-available] [render-finished] [in-flight fence]
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use deferred_rhi::command::{CommandBuffer, CommandPool};
use deferred_rhi::device::Device;
use deferred_rhi::instance::Instance;
use deferred_rhi::swapchain::Swapchain;
use deferred_rhi::sync::{Fence, Semaphore};
use deferred_rhi::{RhiError, RhiResult};

use crate::error::{RenderError, RenderResult};
use crate::frame::{AcquireOutcome, FrameBackend, PresentOutcome, SurfaceTargets};

/// Stage at which a frame waits on image-available and signals
/// render-finished. The last write to the surface image is a color
/// attachment write.
const FRAME_SEMAPHORE_STAGE: vk::PipelineStageFlags2 =
    vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT;

/// The wait and signal semaphore infos of one frame submission.
fn frame_semaphores(
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
) -> (vk::SemaphoreSubmitInfo<'static>, vk::SemaphoreSubmitInfo<'static>) {
    (
        vk::SemaphoreSubmitInfo::default()
            .semaphore(image_available)
            .stage_mask(FRAME_SEMAPHORE_STAGE),
        vk::SemaphoreSubmitInfo::default()
            .semaphore(render_finished)
            .stage_mask(FRAME_SEMAPHORE_STAGE),
    )
}

/// Per-slot command buffer and synchronization objects.
pub struct FrameData {
    command_buffer: CommandBuffer,
    image_available_semaphore: Semaphore,
    render_finished_semaphore: Semaphore,
    /// Created signaled so the first wait returns immediately.
    in_flight_fence: Fence,
}

impl FrameData {
    fn new(device: Arc<Device>, command_pool: &CommandPool) -> RhiResult<Self> {
        Ok(Self {
            command_buffer: CommandBuffer::new(device.clone(), command_pool)?,
            image_available_semaphore: Semaphore::new(device.clone())?,
            render_finished_semaphore: Semaphore::new(device.clone())?,
            in_flight_fence: Fence::new(device, true)?,
        })
    }

    #[inline]
    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.command_buffer
    }

    #[inline]
    pub fn in_flight_fence(&self) -> &Fence {
        &self.in_flight_fence
    }
}

/// Swapchain plus frame slots.
pub struct SwapchainFrames {
    // Slots go first: their command buffers belong to the pool below.
    frames: Vec<FrameData>,
    command_pool: CommandPool,
    swapchain: Swapchain,
    device: Arc<Device>,
    window_extent: vk::Extent2D,
}

impl SwapchainFrames {
    /// Creates the swapchain and `frames_in_flight` slots.
    ///
    /// # Errors
    ///
    /// Returns an error if the swapchain, pool or any slot object cannot be
    /// created.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        window_extent: vk::Extent2D,
        frames_in_flight: usize,
    ) -> RhiResult<Self> {
        let swapchain = Swapchain::new(
            instance,
            device.clone(),
            surface,
            window_extent.width,
            window_extent.height,
        )?;
        let command_pool = CommandPool::new(device.clone(), device.graphics_family())?;

        let mut frames = Vec::with_capacity(frames_in_flight);
        for i in 0..frames_in_flight {
            frames.push(FrameData::new(device.clone(), &command_pool)?);
            debug!("Created frame slot {}", i);
        }
        info!(
            "Frame backend created with {} frames in flight",
            frames_in_flight
        );

        Ok(Self {
            frames,
            command_pool,
            swapchain,
            device,
            window_extent,
        })
    }

    /// Window size used by the next surface recreation.
    pub fn set_window_extent(&mut self, extent: vk::Extent2D) {
        self.window_extent = extent;
    }

    /// Current swapchain images, format and extent.
    pub fn surface_targets(&self) -> SurfaceTargets {
        SurfaceTargets {
            format: self.swapchain.format(),
            extent: self.swapchain.extent(),
            images: self.swapchain.images().to_vec(),
            views: self.swapchain.image_views().to_vec(),
        }
    }

    #[inline]
    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }

    #[inline]
    pub fn frame(&self, slot: usize) -> Option<&FrameData> {
        self.frames.get(slot)
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    fn slot(&self, slot: usize) -> RenderResult<&FrameData> {
        self.frames
            .get(slot)
            .ok_or_else(|| RhiError::InvalidHandle(format!("frame slot {slot}")).into())
    }

    /// Replaces every slot's semaphores.
    fn reset_semaphores(&mut self) -> RhiResult<()> {
        for (i, frame) in self.frames.iter_mut().enumerate() {
            frame.image_available_semaphore = Semaphore::new(self.device.clone())?;
            frame.render_finished_semaphore = Semaphore::new(self.device.clone())?;
            debug!("Reset semaphores for frame slot {}", i);
        }
        Ok(())
    }
}

impl FrameBackend for SwapchainFrames {
    type Commands = CommandBuffer;

    fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    fn wait_for_slot(&mut self, slot: usize) -> RenderResult<()> {
        self.slot(slot)?.in_flight_fence.wait(u64::MAX)?;
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> RenderResult<AcquireOutcome> {
        let semaphore = self.slot(slot)?.image_available_semaphore.handle();
        match self.swapchain.acquire_next_image(semaphore) {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Ready {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(RhiError::from(e).into()),
        }
    }

    fn begin_commands(&mut self, slot: usize) -> RenderResult<CommandBuffer> {
        let cmd = &self.slot(slot)?.command_buffer;
        cmd.reset()?;
        cmd.begin()?;
        Ok(cmd.clone())
    }

    fn submit(&mut self, slot: usize, _image_index: u32) -> RenderResult<()> {
        let frame = self.slot(slot)?;
        frame.command_buffer.end()?;
        frame.in_flight_fence.reset()?;

        let (wait, signal) = frame_semaphores(
            frame.image_available_semaphore.handle(),
            frame.render_finished_semaphore.handle(),
        );
        let (wait, signal) = ([wait], [signal]);
        let commands =
            [vk::CommandBufferSubmitInfo::default().command_buffer(frame.command_buffer.handle())];
        let submit = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait)
            .command_buffer_infos(&commands)
            .signal_semaphore_infos(&signal);

        unsafe {
            self.device
                .submit_graphics(&[submit], frame.in_flight_fence.handle())
        }
        .map_err(|e| RenderError::Submission(format!("queue_submit2 failed: {e}")))
    }

    fn present(&mut self, slot: usize, image_index: u32) -> RenderResult<PresentOutcome> {
        let semaphore = self.slot(slot)?.render_finished_semaphore.handle();
        match self
            .swapchain
            .present(self.device.present_queue(), image_index, semaphore)
        {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::SUBOPTIMAL_KHR) => {
                debug!("Swapchain suboptimal during present");
                Ok(PresentOutcome::Suboptimal)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain out of date during present");
                Ok(PresentOutcome::OutOfDate)
            }
            Err(e) => Err(RhiError::from(e).into()),
        }
    }

    fn wait_idle(&mut self) -> RenderResult<()> {
        self.device.wait_idle()?;
        Ok(())
    }

    fn recreate_surface(&mut self) -> RenderResult<SurfaceTargets> {
        self.swapchain
            .recreate(self.window_extent.width, self.window_extent.height)?;
        self.reset_semaphores()?;
        info!("Reset all frame semaphores");
        Ok(self.surface_targets())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swapchain_frames_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<SwapchainFrames>();
        assert_send::<FrameData>();
    }

    #[test]
    fn test_frame_semaphores_share_color_output_stage() {
        let (wait, signal) = frame_semaphores(vk::Semaphore::null(), vk::Semaphore::null());
        assert_eq!(wait.stage_mask, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(signal.stage_mask, wait.stage_mask);
    }
}
