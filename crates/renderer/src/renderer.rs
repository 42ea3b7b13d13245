//! Top-level deferred renderer.
//!
//! [`DeferredRenderer`] owns the Vulkan objects, the scene data, the pass
//! pipeline and the resource registry, and drives them through a
//! [`FrameScheduler`].
//!
//! # Resource Destruction Order
//!
//! ```text
//! 1. Wait for the device to go idle
//! 2. Pass cleanup (handles only)
//! 3. Registry flush (pass pipelines, targets, descriptors)
//! 4. Scene data and the upload pool
//! 5. Frame slots, their pool and the swapchain
//! 6. Surface
//! 7. Device
//! 8. Instance
//! ```
//!
//! ManuallyDrop keeps that order independent of field order.

use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info, warn};

use deferred_core::{RendererConfig, ToneMapOperator};
use deferred_platform::{Surface, Window};
use deferred_rhi::command::{CommandBuffer, CommandPool};
use deferred_rhi::device::Device;
use deferred_rhi::instance::Instance;
use deferred_rhi::physical_device::select_physical_device;
use deferred_scene::{Camera, DirectionalLight, OrbitController, SceneGeometry};

use crate::deletion_queue::DeletionQueue;
use crate::dependencies::PassDependencies;
use crate::error::RenderResult;
use crate::frame::{FrameInfo, FrameRecorder, FrameStatus, SurfaceTargets};
use crate::frame_manager::SwapchainFrames;
use crate::passes::{
    GpuPasses, PassContext, PassPipeline, SharedResources, ToneSettings, deferred_pipeline,
};
use crate::scene_data::SceneGlobalData;
use crate::scheduler::FrameScheduler;
use crate::ubo::CameraUbo;

const FOV_Y_DEGREES: f32 = 45.0;
const NEAR_PLANE: f32 = 0.1;
const FAR_PLANE: f32 = 500.0;

/// Borrowed renderer state shared by every pass context except the frame.
#[derive(Clone, Copy)]
struct PassState<'r> {
    device: &'r Arc<Device>,
    command_pool: &'r CommandPool,
    frames_in_flight: usize,
    camera: &'r Camera,
    light: &'r DirectionalLight,
    config: &'r RendererConfig,
    tone: ToneSettings,
    scene: &'r SceneGlobalData,
}

impl<'r> PassState<'r> {
    fn context<'a>(
        &self,
        surface: &'a SurfaceTargets,
        frame: Option<&'a FrameInfo<CommandBuffer>>,
        dependencies: &'a mut PassDependencies,
        registry: &'a mut DeletionQueue,
    ) -> PassContext<'a>
    where
        'r: 'a,
    {
        PassContext {
            shared: SharedResources {
                device: self.device,
                command_pool: self.command_pool,
                surface,
                frame,
                frames_in_flight: self.frames_in_flight,
                camera: self.camera,
                light: self.light,
                config: self.config,
                tone: self.tone,
            },
            scene: self.scene,
            dependencies,
            registry,
        }
    }
}

/// Adapts the pass pipeline to [`FrameRecorder`].
struct PipelineRecorder<'r> {
    state: PassState<'r>,
    passes: &'r mut PassPipeline<GpuPasses>,
    dependencies: &'r mut PassDependencies,
    registry: &'r mut DeletionQueue,
    surface: &'r mut SurfaceTargets,
}

impl FrameRecorder<CommandBuffer> for PipelineRecorder<'_> {
    fn record(&mut self, frame: &FrameInfo<CommandBuffer>) -> RenderResult<()> {
        // The slot fence has been waited on, so its uniform is free.
        self.state
            .scene
            .update_camera(frame.frame_index, &CameraUbo::from_camera(self.state.camera))?;

        let result = {
            let mut ctx = self.state.context(
                &*self.surface,
                Some(frame),
                &mut *self.dependencies,
                &mut *self.registry,
            );
            self.passes.execute(&mut ctx)
        };
        if result.is_err() {
            self.dependencies.discard_slot(frame.frame_index);
        }
        result
    }

    fn recreate_swapchain(&mut self, surface: &SurfaceTargets) -> RenderResult<()> {
        *self.surface = surface.clone();
        let mut ctx = self.state.context(
            &*self.surface,
            None,
            &mut *self.dependencies,
            &mut *self.registry,
        );
        self.passes.recreate_swapchain(&mut ctx)
    }
}

/// Deferred renderer for one window.
pub struct DeferredRenderer {
    passes: PassPipeline<GpuPasses>,
    dependencies: PassDependencies,
    /// Owns every pass-created GPU object
    registry: DeletionQueue,
    scene: ManuallyDrop<SceneGlobalData>,
    /// Pool for one-shot setup and upload submissions
    upload_pool: ManuallyDrop<CommandPool>,
    scheduler: ManuallyDrop<FrameScheduler<SwapchainFrames>>,
    surface_targets: SurfaceTargets,
    surface: ManuallyDrop<Surface>,
    device: ManuallyDrop<Arc<Device>>,
    instance: ManuallyDrop<Instance>,

    config: RendererConfig,
    tone: ToneSettings,
    camera: Camera,
    orbit: OrbitController,
    light: DirectionalLight,
    /// Set while the window has a zero-sized drawable
    paused: bool,
}

impl DeferredRenderer {
    /// Creates the renderer, uploads `geometry`, initializes every pass and
    /// runs the setup passes.
    ///
    /// # Errors
    ///
    /// Returns an error if any Vulkan object cannot be created, the scene is
    /// invalid, or a pass fails to initialize. Objects created before the
    /// failure are released.
    pub fn new(
        window: &Window,
        config: RendererConfig,
        geometry: &SceneGeometry,
    ) -> RenderResult<Self> {
        let config = config.validated();
        let (width, height) = window.size();
        info!(
            "Initializing deferred renderer ({}x{}, {} frame(s) in flight)",
            width, height, config.frames_in_flight
        );

        let instance = Instance::new(
            &config.window_title,
            &window.required_extensions()?,
            config.enable_validation,
        )?;
        let surface = window.create_surface(instance.entry(), instance.handle())?;
        let physical_device =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &physical_device)?;

        let frames = SwapchainFrames::new(
            &instance,
            device.clone(),
            surface.handle(),
            vk::Extent2D { width, height },
            config.frames_in_flight,
        )?;
        let surface_targets = frames.surface_targets();
        let scheduler = FrameScheduler::new(frames);

        let upload_pool = CommandPool::new(device.clone(), device.graphics_family())?;
        let scene = SceneGlobalData::new(
            device.clone(),
            &upload_pool,
            geometry,
            config.frames_in_flight,
        )?;

        let mut camera = Camera::new();
        camera.set_perspective(
            FOV_Y_DEGREES.to_radians(),
            1.0,
            NEAR_PLANE,
            FAR_PLANE,
        );
        camera.set_viewport(surface_targets.extent.width, surface_targets.extent.height);
        let bounds = scene.bounds();
        let mut orbit = OrbitController::framing(bounds.center(), bounds.radius());
        orbit.update(&mut camera, 0.0);

        let mut renderer = Self {
            passes: deferred_pipeline(),
            dependencies: PassDependencies::new(),
            registry: DeletionQueue::new(),
            scene: ManuallyDrop::new(scene),
            upload_pool: ManuallyDrop::new(upload_pool),
            scheduler: ManuallyDrop::new(scheduler),
            surface_targets,
            surface: ManuallyDrop::new(surface),
            device: ManuallyDrop::new(device),
            instance: ManuallyDrop::new(instance),
            tone: ToneSettings::from_config(&config),
            config,
            camera,
            orbit,
            light: DirectionalLight::default(),
            paused: false,
        };

        // On failure the renderer drops here, cleaning up whatever passes
        // did initialize.
        renderer.with_context(|passes, ctx| {
            passes.initialize(ctx)?;
            passes.run_setup(ctx)
        })?;

        info!(
            "Deferred renderer ready: passes {:?}",
            renderer.passes.pass_names()
        );
        Ok(renderer)
    }

    /// Advances the camera by `dt` seconds and draws one frame.
    ///
    /// Recoverable failures trigger one swapchain recreation and report
    /// [`FrameStatus::Recreated`].
    ///
    /// # Errors
    ///
    /// Returns fatal errors, and errors raised while recovering.
    pub fn render_frame(&mut self, dt: f32) -> RenderResult<FrameStatus> {
        if self.paused {
            return Ok(FrameStatus::Skipped);
        }
        self.orbit.update(&mut self.camera, dt);

        match self.with_recorder(|scheduler, recorder| scheduler.draw_frame(recorder)) {
            Ok(status) => Ok(status),
            Err(e) if !e.is_fatal() => {
                warn!("Frame failed ({}), recreating the swapchain", e);
                self.with_recorder(|scheduler, recorder| scheduler.recreate_swapchain(recorder))?;
                Ok(FrameStatus::Recreated)
            }
            Err(e) => {
                error!("Fatal frame error: {}", e);
                Err(e)
            }
        }
    }

    /// Records a new window size. A zero extent pauses rendering until the
    /// next non-zero size.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            if !self.paused {
                debug!("Window minimized, pausing rendering");
            }
            self.paused = true;
            return;
        }

        self.paused = false;
        self.scheduler
            .backend_mut()
            .set_window_extent(vk::Extent2D { width, height });
        self.scheduler.mark_framebuffer_resized();
        self.camera.set_viewport(width, height);
        debug!("Resize to {}x{} requested", width, height);
    }

    /// Switches to the next tone-mapping operator.
    pub fn cycle_tone_mapping(&mut self) -> ToneMapOperator {
        self.config.tone_mapping = self.config.tone_mapping.next();
        self.tone = ToneSettings::from_config(&self.config);
        info!("Tone mapping: {:?}", self.tone.operator);
        self.tone.operator
    }

    /// Multiplies the exposure and returns the new value.
    pub fn scale_exposure(&mut self, factor: f32) -> f32 {
        self.config.scale_exposure(factor);
        self.tone = ToneSettings::from_config(&self.config);
        debug!("Exposure: {:.3}", self.tone.exposure);
        self.tone.exposure
    }

    pub fn toggle_orbit(&mut self) {
        self.orbit.toggle_pause();
    }

    #[inline]
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn orbit_mut(&mut self) -> &mut OrbitController {
        &mut self.orbit
    }

    #[inline]
    pub fn light(&self) -> &DirectionalLight {
        &self.light
    }

    /// Replaces the light. The environment maps keep the sun they were
    /// computed with.
    pub fn set_light(&mut self, light: DirectionalLight) {
        self.light = light;
    }

    #[inline]
    pub fn tone_settings(&self) -> ToneSettings {
        self.tone
    }

    #[inline]
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    #[inline]
    pub fn frame_counter(&self) -> u64 {
        self.scheduler.frame_counter()
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.surface_targets.extent
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.pass_names()
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Runs `f` with the scheduler and a recorder over the pass pipeline.
    fn with_recorder<T>(
        &mut self,
        f: impl FnOnce(&mut FrameScheduler<SwapchainFrames>, &mut PipelineRecorder<'_>) -> T,
    ) -> T {
        let Self {
            passes,
            dependencies,
            registry,
            scene,
            upload_pool,
            scheduler,
            surface_targets,
            device,
            config,
            tone,
            camera,
            light,
            ..
        } = self;

        let mut recorder = PipelineRecorder {
            state: PassState {
                device: &**device,
                command_pool: &**upload_pool,
                frames_in_flight: scheduler.frames_in_flight(),
                camera,
                light,
                config,
                tone: *tone,
                scene: &**scene,
            },
            passes,
            dependencies,
            registry,
            surface: surface_targets,
        };
        f(&mut **scheduler, &mut recorder)
    }

    /// Runs `f` with the pass pipeline and a context outside frame recording.
    fn with_context<T>(
        &mut self,
        f: impl FnOnce(&mut PassPipeline<GpuPasses>, &mut PassContext<'_>) -> T,
    ) -> T {
        self.with_recorder(|_, recorder| {
            let mut ctx = recorder.state.context(
                &*recorder.surface,
                None,
                &mut *recorder.dependencies,
                &mut *recorder.registry,
            );
            f(&mut *recorder.passes, &mut ctx)
        })
    }
}

impl Drop for DeferredRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.scheduler.wait_idle() {
            error!("Failed to wait for device idle during renderer drop: {}", e);
        }

        self.with_context(|passes, ctx| passes.cleanup(ctx));
        let released = self.registry.flush();
        debug!("Registry released {} object(s)", released);

        unsafe {
            ManuallyDrop::drop(&mut self.scene);
            ManuallyDrop::drop(&mut self.upload_pool);
            ManuallyDrop::drop(&mut self.scheduler);
            ManuallyDrop::drop(&mut self.surface);
            ManuallyDrop::drop(&mut self.device);
            ManuallyDrop::drop(&mut self.instance);
        }

        info!("Deferred renderer destroyed");
    }
}
