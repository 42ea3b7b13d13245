//! Shadow map placeholder.
//!
//! Occupies its slot at the head of the setup order so later passes keep
//! their positions once shadow maps exist. It records nothing and publishes
//! nothing.

use tracing::debug;

use super::{GpuPasses, PassContext, PassSchedule, RenderPass};
use crate::error::RenderResult;

#[derive(Debug, Default)]
pub struct ShadowPass;

impl ShadowPass {
    pub fn new() -> Self {
        Self
    }
}

impl RenderPass<GpuPasses> for ShadowPass {
    fn name(&self) -> &'static str {
        "shadow"
    }

    fn schedule(&self) -> PassSchedule {
        PassSchedule::Setup
    }

    fn initialize(&mut self, _ctx: &mut PassContext<'_>) -> RenderResult<()> {
        debug!("Shadow pass has no resources");
        Ok(())
    }

    fn execute(&mut self, _ctx: &mut PassContext<'_>) -> RenderResult<()> {
        Ok(())
    }

    fn recreate_swapchain(&mut self, _ctx: &mut PassContext<'_>) -> RenderResult<()> {
        Ok(())
    }

    fn cleanup(&mut self, _ctx: &mut PassContext<'_>) {}
}
