//! Frame orchestration for a Vulkan deferred renderer.
//!
//! This crate owns everything between the RHI and the viewer:
//! - Frame scheduling with several frames in flight
//! - The ordered pass pipeline (shadow, environment, depth pre-pass,
//!   G-buffer, lighting, tone mapping)
//! - Cross-pass image layout tracking
//! - A named registry that owns pass-created GPU objects until shutdown
//!
//! ```
//! use deferred_renderer::DeletionQueue;
//!
//! let mut registry = DeletionQueue::new();
//! registry.retain("lighting.pipeline", String::from("pipeline"));
//! assert!(registry.contains("lighting.pipeline"));
//! assert_eq!(registry.flush(), 1);
//! ```

pub mod deletion_queue;
pub mod dependencies;
pub mod error;
pub mod frame;
pub mod frame_manager;
pub mod layout;
pub mod passes;
pub mod renderer;
pub mod scene_data;
pub mod scheduler;
pub mod ubo;

pub use deletion_queue::DeletionQueue;
pub use dependencies::PassDependencies;
pub use error::{RenderError, RenderResult};
pub use frame::{
    AcquireOutcome, FrameBackend, FrameInfo, FrameRecorder, FrameStatus, PresentOutcome,
    SlotState, SurfaceTargets,
};
pub use frame_manager::SwapchainFrames;
pub use layout::{ImageState, LayoutTracker, LayoutTransition, TrackedImage};
pub use passes::{
    GpuPasses, PassContext, PassContextFamily, PassPipeline, PassSchedule, RenderPass,
    ToneSettings, deferred_pipeline,
};
pub use renderer::DeferredRenderer;
pub use scene_data::SceneGlobalData;
pub use scheduler::FrameScheduler;
