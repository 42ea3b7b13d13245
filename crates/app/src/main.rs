//! Deferred viewer - Main Entry Point
//!
//! Opens a window, renders the demo scene through the deferred pipeline and
//! orbits the camera around it.
//!
//! Keys: Esc quits, Space pauses the orbit, T cycles tone mapping, +/- scale
//! the exposure.

use anyhow::Result;
use tracing::{debug, error, info};
use winit::application::ApplicationHandler;
use winit::event_loop::ControlFlow;
use winit::keyboard::PhysicalKey;
use winit::window::WindowId;

use deferred_core::{DEFAULT_LOG_FILTER, FrameTimer, RendererConfig};
use deferred_platform::{ActiveEventLoop, EventLoop, InputState, ViewerAction, Window, WindowEvent};
use deferred_renderer::DeferredRenderer;
use deferred_scene::SceneGeometry;

/// Seconds between FPS log lines.
const FPS_LOG_INTERVAL: f32 = 2.0;
const EXPOSURE_STEP: f32 = 1.25;

struct App {
    config: RendererConfig,
    window: Option<Window>,
    renderer: Option<DeferredRenderer>,
    input: InputState,
    timer: FrameTimer,
    last_fps_log: f32,
}

impl App {
    fn new(config: RendererConfig) -> Self {
        Self {
            config,
            window: None,
            renderer: None,
            input: InputState::new(),
            timer: FrameTimer::new(),
            last_fps_log: 0.0,
        }
    }

    fn handle_actions(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        for action in self.input.actions() {
            match action {
                ViewerAction::Quit => {
                    info!("Quit requested");
                    event_loop.exit();
                }
                ViewerAction::ToggleOrbit => renderer.toggle_orbit(),
                ViewerAction::CycleToneMapping => {
                    renderer.cycle_tone_mapping();
                }
                ViewerAction::ExposureUp => {
                    renderer.scale_exposure(EXPOSURE_STEP);
                }
                ViewerAction::ExposureDown => {
                    renderer.scale_exposure(1.0 / EXPOSURE_STEP);
                }
            }
        }
        self.input.begin_frame();
    }

    fn log_fps(&mut self) {
        let now = self.timer.elapsed_secs();
        if now - self.last_fps_log < FPS_LOG_INTERVAL {
            return;
        }
        self.last_fps_log = now;
        if let (Some(fps), Some(renderer)) = (self.timer.fps(), self.renderer.as_ref()) {
            info!(
                "{:.1} fps, {} frames presented",
                fps,
                renderer.frame_counter()
            );
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match Window::new(
            event_loop,
            self.config.window_width,
            self.config.window_height,
            &self.config.window_title,
        ) {
            Ok(window) => window,
            Err(e) => {
                error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };

        match DeferredRenderer::new(&window, self.config.clone(), &SceneGeometry::demo()) {
            Ok(renderer) => {
                info!("Initialization complete, entering main loop");
                self.renderer = Some(renderer);
                self.window = Some(window);
            }
            Err(e) => {
                error!("Failed to create renderer: {}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                self.handle_actions(event_loop);
                let dt = self.timer.tick();

                if let Some(renderer) = self.renderer.as_mut()
                    && let Err(e) = renderer.render_frame(dt)
                {
                    error!("Render error: {}", e);
                    if e.is_fatal() {
                        event_loop.exit();
                    }
                }
                self.log_fps();
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    if event.state.is_pressed() {
                        self.input.on_key_pressed(key);
                    } else {
                        self.input.on_key_released(key);
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // The renderer must go before the window it presents to.
        self.renderer = None;
        self.window = None;
    }
}

fn main() -> Result<()> {
    let config = RendererConfig::from_env()?;
    deferred_core::init_logging_with(config.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER));
    info!("Starting deferred viewer");
    debug!("Config: {:?}", config);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    Ok(())
}
