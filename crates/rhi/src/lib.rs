//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! RAII wrappers over the `ash` objects the deferred renderer needs:
//! - Instance, physical device selection and logical device
//! - Swapchain management
//! - Command pools, command buffers and one-shot submission
//! - Buffers and textures backed by gpu-allocator
//! - Descriptor layouts and pools
//! - Graphics (dynamic rendering) and compute pipelines
//! - Synchronization primitives

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod texture;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
