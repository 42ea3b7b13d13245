//! Pass pipeline and the deferred passes.
//!
//! A [`PassPipeline`] is a fixed, ordered list of boxed [`RenderPass`]es.
//! Passes never call each other: everything one pass hands to the next goes
//! through [`PassDependencies`]. The context a pass receives is named by a
//! [`PassContextFamily`], so the same pipeline code drives the GPU passes
//! ([`GpuPasses`]) and test doubles.
//!
//! Static order:
//!
//! ```text
//! shadow (setup) -> environment (setup) -> depth prepass -> gbuffer -> lighting -> tone mapping
//! ```

mod depth_prepass;
mod environment;
mod gbuffer;
mod lighting;
mod shadow;
mod tone_mapping;

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, trace};

use deferred_core::RendererConfig;
use deferred_rhi::command::{CommandBuffer, CommandPool};
use deferred_rhi::device::Device;
use deferred_rhi::pipeline::{Pipeline, PipelineLayout};
use deferred_rhi::shader::{Shader, ShaderStage};
use deferred_scene::{Camera, DirectionalLight};

use crate::deletion_queue::DeletionQueue;
use crate::dependencies::PassDependencies;
use crate::error::{RenderError, RenderResult};
use crate::frame::{FrameInfo, SurfaceTargets};
use crate::scene_data::SceneGlobalData;
use crate::ubo::DrawPush;

pub use depth_prepass::DepthPrepass;
pub use environment::EnvironmentPass;
pub use gbuffer::GBufferPass;
pub use lighting::LightingPass;
pub use shadow::ShadowPass;
pub use tone_mapping::{ToneMappingPass, ToneSettings};

/// When a pass runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassSchedule {
    /// Every frame, inside the frame's command buffer
    PerFrame,
    /// Once, after initialization, during scene setup
    Setup,
}

/// Names the context type handed to passes for one borrow scope.
pub trait PassContextFamily: 'static {
    type Context<'a>;
}

/// One stage of the pipeline.
pub trait RenderPass<F: PassContextFamily> {
    fn name(&self) -> &'static str;

    fn schedule(&self) -> PassSchedule {
        PassSchedule::PerFrame
    }

    /// Creates pipelines, targets and descriptors.
    fn initialize(&mut self, ctx: &mut F::Context<'_>) -> RenderResult<()>;

    fn execute(&mut self, ctx: &mut F::Context<'_>) -> RenderResult<()>;

    /// Rebuilds everything sized or formatted after the surface.
    fn recreate_swapchain(&mut self, ctx: &mut F::Context<'_>) -> RenderResult<()>;

    fn cleanup(&mut self, ctx: &mut F::Context<'_>);
}

/// Ordered passes with a shared lifecycle.
pub struct PassPipeline<F: PassContextFamily> {
    passes: Vec<Box<dyn RenderPass<F>>>,
    /// Passes whose `initialize` succeeded, counted from the front.
    initialized: usize,
    ready: bool,
}

impl<F: PassContextFamily> Default for PassPipeline<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: PassContextFamily> PassPipeline<F> {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            initialized: 0,
            ready: false,
        }
    }

    /// Appends a pass to the static order.
    pub fn push(&mut self, pass: impl RenderPass<F> + 'static) -> &mut Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// Initializes every pass in order.
    ///
    /// # Errors
    ///
    /// The first failure aborts with [`RenderError::PassInitialization`]
    /// naming the pass. Passes initialized before it are still cleaned up by
    /// [`cleanup`](Self::cleanup).
    pub fn initialize(&mut self, ctx: &mut F::Context<'_>) -> RenderResult<()> {
        if self.ready {
            debug!("Pass pipeline already initialized");
            return Ok(());
        }

        for pass in &mut self.passes[self.initialized..] {
            let name = pass.name();
            pass.initialize(ctx)
                .map_err(|source| RenderError::PassInitialization {
                    pass: name,
                    source: Box::new(source),
                })?;
            self.initialized += 1;
            info!("Pass '{}' initialized", name);
        }
        self.ready = true;
        Ok(())
    }

    /// Runs the setup passes once.
    pub fn run_setup(&mut self, ctx: &mut F::Context<'_>) -> RenderResult<()> {
        self.ensure_ready()?;
        for pass in self.scheduled(PassSchedule::Setup) {
            debug!("Running setup pass '{}'", pass.name());
            pass.execute(ctx)?;
        }
        Ok(())
    }

    /// Runs the per-frame passes in order.
    pub fn execute(&mut self, ctx: &mut F::Context<'_>) -> RenderResult<()> {
        self.ensure_ready()?;
        for pass in self.scheduled(PassSchedule::PerFrame) {
            trace!("Executing pass '{}'", pass.name());
            pass.execute(ctx)?;
        }
        Ok(())
    }

    /// Calls every pass's `recreate_swapchain` once, in order.
    pub fn recreate_swapchain(&mut self, ctx: &mut F::Context<'_>) -> RenderResult<()> {
        self.ensure_ready()?;
        for pass in &mut self.passes {
            debug!("Recreating swapchain resources of '{}'", pass.name());
            pass.recreate_swapchain(ctx)?;
        }
        Ok(())
    }

    /// Cleans up initialized passes in reverse order. Later calls do nothing.
    pub fn cleanup(&mut self, ctx: &mut F::Context<'_>) {
        if self.initialized == 0 {
            return;
        }
        for pass in self.passes[..self.initialized].iter_mut().rev() {
            debug!("Cleaning up pass '{}'", pass.name());
            pass.cleanup(ctx);
        }
        self.initialized = 0;
        self.ready = false;
        info!("Pass pipeline cleaned up");
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|pass| pass.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn is_initialized(&self) -> bool {
        self.ready
    }

    fn ensure_ready(&self) -> RenderResult<()> {
        if self.ready {
            Ok(())
        } else {
            Err(RenderError::PipelineNotInitialized)
        }
    }

    fn scheduled(
        &mut self,
        schedule: PassSchedule,
    ) -> impl Iterator<Item = &mut Box<dyn RenderPass<F>>> {
        self.passes
            .iter_mut()
            .filter(move |pass| pass.schedule() == schedule)
    }
}

// =============================================================================
// GPU context
// =============================================================================

/// Borrowed renderer state every pass can read.
pub struct SharedResources<'a> {
    pub device: &'a Arc<Device>,
    /// Pool for one-shot setup submissions
    pub command_pool: &'a CommandPool,
    pub surface: &'a SurfaceTargets,
    /// The frame being recorded; `None` outside frame recording
    pub frame: Option<&'a FrameInfo<CommandBuffer>>,
    pub frames_in_flight: usize,
    pub camera: &'a Camera,
    pub light: &'a DirectionalLight,
    pub config: &'a RendererConfig,
    pub tone: ToneSettings,
}

/// Context of the GPU passes.
pub struct PassContext<'a> {
    pub shared: SharedResources<'a>,
    pub scene: &'a SceneGlobalData,
    pub dependencies: &'a mut PassDependencies,
    pub registry: &'a mut DeletionQueue,
}

impl<'a> PassContext<'a> {
    /// The frame being recorded.
    ///
    /// # Errors
    ///
    /// Fails when called outside frame recording.
    pub fn frame(&self) -> RenderResult<&'a FrameInfo<CommandBuffer>> {
        self.shared
            .frame
            .ok_or_else(|| RenderError::MissingDependency("frame command buffer".into()))
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.shared.surface.extent
    }

    pub fn load_shader(&self, name: &str, stage: ShaderStage) -> RenderResult<Shader> {
        let path = self.shared.config.shader_path(name);
        Ok(Shader::from_spirv_file(
            self.shared.device.clone(),
            &path,
            stage,
            "main",
        )?)
    }
}

/// [`PassContextFamily`] of the GPU passes.
pub struct GpuPasses;

impl PassContextFamily for GpuPasses {
    type Context<'a> = PassContext<'a>;
}

/// Builds the deferred pipeline in its static order.
pub fn deferred_pipeline() -> PassPipeline<GpuPasses> {
    let mut pipeline = PassPipeline::new();
    pipeline
        .push(ShadowPass::new())
        .push(EnvironmentPass::new())
        .push(DepthPrepass::new())
        .push(GBufferPass::new())
        .push(LightingPass::new())
        .push(ToneMappingPass::new());
    pipeline
}

/// Pipeline and layout handles kept by a pass while the registry owns the
/// objects.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct PipelineHandles {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

impl PipelineHandles {
    /// Hands `pipeline` and `layout` to the registry under `name`.
    ///
    /// Re-registering a name drops the previous pair immediately.
    pub fn register(
        registry: &mut DeletionQueue,
        name: &str,
        pipeline: Pipeline,
        layout: PipelineLayout,
    ) -> Self {
        let handles = Self {
            pipeline: pipeline.handle(),
            layout: layout.handle(),
        };
        // Pipeline first so it is destroyed before its layout.
        registry.retain(name.to_string(), (pipeline, layout));
        handles
    }
}

/// Begins dynamic rendering over `extent`.
pub(crate) fn begin_rendering(
    cmd: &CommandBuffer,
    extent: vk::Extent2D,
    color: &[vk::RenderingAttachmentInfo],
    depth: Option<&vk::RenderingAttachmentInfo>,
) {
    let mut info = vk::RenderingInfo::default()
        .render_area(vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        })
        .layer_count(1)
        .color_attachments(color);
    if let Some(depth) = depth {
        info = info.depth_attachment(depth);
    }
    cmd.begin_rendering(&info);
    cmd.set_viewport_and_scissor(extent);
}

/// Draws every scene primitive with its [`DrawPush`].
///
/// Expects a pipeline whose set 0 is the scene set.
pub(crate) fn draw_scene(
    cmd: &CommandBuffer,
    scene: &SceneGlobalData,
    layout: vk::PipelineLayout,
    push_stages: vk::ShaderStageFlags,
    slot: usize,
) {
    cmd.bind_descriptor_sets(
        vk::PipelineBindPoint::GRAPHICS,
        layout,
        0,
        &[scene.frame_set(slot)],
    );
    cmd.bind_index_buffer(scene.index_buffer(), vk::IndexType::UINT32);
    for primitive in scene.primitives() {
        let push = DrawPush::new(scene.vertex_address(), scene.material(primitive));
        cmd.push_constants(layout, push_stages, &push);
        cmd.draw_indexed(primitive.index_count, primitive.first_index, 0);
    }
}

pub(crate) fn color_attachment(
    view: vk::ImageView,
    clear: [f32; 4],
) -> vk::RenderingAttachmentInfo<'static> {
    vk::RenderingAttachmentInfo::default()
        .image_view(view)
        .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .clear_value(vk::ClearValue {
            color: vk::ClearColorValue { float32: clear },
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Log;

    impl PassContextFamily for Log {
        type Context<'a> = Vec<String>;
    }

    struct Named {
        name: &'static str,
        schedule: PassSchedule,
        fail_init: bool,
    }

    impl Named {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                schedule: PassSchedule::PerFrame,
                fail_init: false,
            }
        }
    }

    impl RenderPass<Log> for Named {
        fn name(&self) -> &'static str {
            self.name
        }

        fn schedule(&self) -> PassSchedule {
            self.schedule
        }

        fn initialize(&mut self, ctx: &mut Vec<String>) -> RenderResult<()> {
            if self.fail_init {
                return Err(RenderError::MissingDependency("shader".into()));
            }
            ctx.push(format!("init {}", self.name));
            Ok(())
        }

        fn execute(&mut self, ctx: &mut Vec<String>) -> RenderResult<()> {
            ctx.push(format!("exec {}", self.name));
            Ok(())
        }

        fn recreate_swapchain(&mut self, ctx: &mut Vec<String>) -> RenderResult<()> {
            ctx.push(format!("recreate {}", self.name));
            Ok(())
        }

        fn cleanup(&mut self, ctx: &mut Vec<String>) {
            ctx.push(format!("cleanup {}", self.name));
        }
    }

    #[test]
    fn test_execute_before_initialize_fails() {
        let mut pipeline = PassPipeline::<Log>::new();
        pipeline.push(Named::new("a"));
        let err = pipeline.execute(&mut Vec::new()).unwrap_err();
        assert!(matches!(err, RenderError::PipelineNotInitialized));
    }

    #[test]
    fn test_setup_passes_only_run_in_setup() {
        let mut pipeline = PassPipeline::<Log>::new();
        pipeline.push(Named {
            schedule: PassSchedule::Setup,
            ..Named::new("env")
        });
        pipeline.push(Named::new("draw"));

        let mut log = Vec::new();
        pipeline.initialize(&mut log).unwrap();
        pipeline.run_setup(&mut log).unwrap();
        pipeline.execute(&mut log).unwrap();
        assert_eq!(
            log,
            vec!["init env", "init draw", "exec env", "exec draw"]
        );
    }

    #[test]
    fn test_failed_initialize_names_pass_and_cleans_prefix() {
        let mut pipeline = PassPipeline::<Log>::new();
        pipeline.push(Named::new("a"));
        pipeline.push(Named {
            fail_init: true,
            ..Named::new("b")
        });
        pipeline.push(Named::new("c"));

        let mut log = Vec::new();
        let err = pipeline.initialize(&mut log).unwrap_err();
        assert!(matches!(err, RenderError::PassInitialization { pass: "b", .. }));
        assert!(!pipeline.is_initialized());

        pipeline.cleanup(&mut log);
        assert_eq!(log, vec!["init a", "cleanup a"]);
    }

    #[test]
    fn test_cleanup_is_reverse_and_idempotent() {
        let mut pipeline = PassPipeline::<Log>::new();
        pipeline.push(Named::new("a")).push(Named::new("b"));
        let mut log = Vec::new();
        pipeline.initialize(&mut log).unwrap();
        log.clear();

        pipeline.cleanup(&mut log);
        pipeline.cleanup(&mut log);
        assert_eq!(log, vec!["cleanup b", "cleanup a"]);
        assert!(pipeline.execute(&mut log).is_err());
    }

    #[test]
    fn test_deferred_pipeline_order() {
        let pipeline = deferred_pipeline();
        assert_eq!(
            pipeline.pass_names(),
            vec![
                "shadow",
                "environment",
                "depth_prepass",
                "gbuffer",
                "lighting",
                "tone_mapping"
            ]
        );
    }
}
