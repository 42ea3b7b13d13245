//! Platform layer for the deferred renderer.
//!
//! - Window management via winit
//! - RAII Vulkan surface creation
//! - Keyboard state and viewer key bindings

mod input;
mod window;

pub use input::{InputState, KeyCode, ViewerAction};
pub use window::{Surface, Window};

pub use winit::event::{ElementState, WindowEvent};
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
