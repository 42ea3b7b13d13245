//! Geometry pass.
//!
//! Writes albedo, normal and material parameters for every visible surface,
//! testing against the depth copy without writing depth. Targets are left
//! shader-read-only for the lighting pass.

use ash::vk;
use tracing::debug;

use deferred_rhi::pipeline::{CompareOp, CullMode, GraphicsPipelineBuilder, PipelineLayout};
use deferred_rhi::shader::ShaderStage;
use deferred_rhi::texture::{DEPTH_FORMAT, Texture, TextureDesc};

use super::{
    GpuPasses, PassContext, PipelineHandles, RenderPass, begin_rendering, color_attachment,
    draw_scene,
};
use crate::error::{RenderError, RenderResult};
use crate::layout::{ImageState, TrackedImage};
use crate::ubo::DrawPush;

const NAME: &str = "gbuffer";
const PUSH_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw(),
);

/// G-buffer targets with their formats.
pub const TARGETS: [(TrackedImage, vk::Format, &str); 3] = [
    (TrackedImage::Albedo, vk::Format::R8G8B8A8_UNORM, "albedo"),
    (TrackedImage::Normal, vk::Format::R16G16B16A16_SFLOAT, "normal"),
    (TrackedImage::Params, vk::Format::R8G8B8A8_UNORM, "params"),
];

#[derive(Default)]
pub struct GBufferPass {
    pipeline: Option<PipelineHandles>,
    extent: vk::Extent2D,
}

impl GBufferPass {
    pub fn new() -> Self {
        Self::default()
    }

    fn create_pipeline(ctx: &mut PassContext<'_>) -> RenderResult<PipelineHandles> {
        let device = ctx.shared.device.clone();
        let vertex = ctx.load_shader("gbuffer.vert", ShaderStage::Vertex)?;
        let fragment = ctx.load_shader("gbuffer.frag", ShaderStage::Fragment)?;
        let formats = TARGETS.map(|(_, format, _)| format);

        let layout = PipelineLayout::new(
            device.clone(),
            &[ctx.scene.set_layout()],
            &[PipelineLayout::push_range::<DrawPush>(PUSH_STAGES)],
        )?;
        let pipeline = GraphicsPipelineBuilder::new()
            .vertex_shader(&vertex)
            .fragment_shader(&fragment)
            .cull_mode(CullMode::Back)
            .depth_test_enable(true)
            .depth_write_enable(false)
            .depth_compare_op(CompareOp::LessOrEqual)
            .color_attachment_formats(&formats)
            .depth_attachment_format(DEPTH_FORMAT)
            .build(device, &layout, NAME)?;

        Ok(PipelineHandles::register(
            ctx.registry,
            "gbuffer.pipeline",
            pipeline,
            layout,
        ))
    }

    fn allocate_targets(&mut self, ctx: &mut PassContext<'_>) -> RenderResult<()> {
        let extent = ctx.extent();
        for slot in 0..ctx.shared.frames_in_flight {
            for (image, format, label) in TARGETS {
                let texture = Texture::new(
                    ctx.shared.device.clone(),
                    &TextureDesc::color_target(format!("{label} {slot}"), extent, format),
                )?;
                ctx.dependencies.publish(NAME, image, slot, texture.handle());
                ctx.registry
                    .retain(format!("gbuffer.{label}.{slot}"), texture);
            }
        }
        self.extent = extent;
        debug!("G-buffer allocated at {}x{}", extent.width, extent.height);
        Ok(())
    }
}

impl RenderPass<GpuPasses> for GBufferPass {
    fn name(&self) -> &'static str {
        NAME
    }

    fn initialize(&mut self, ctx: &mut PassContext<'_>) -> RenderResult<()> {
        self.pipeline = Some(Self::create_pipeline(ctx)?);
        self.allocate_targets(ctx)
    }

    fn execute(&mut self, ctx: &mut PassContext<'_>) -> RenderResult<()> {
        let pipeline = self.pipeline.ok_or(RenderError::PipelineNotInitialized)?;
        let frame = ctx.frame()?;
        let cmd = &frame.command_buffer;
        let slot = frame.frame_index;
        let deps = &mut *ctx.dependencies;

        deps.require_layout(TrackedImage::DepthCopy, slot, ImageState::DepthReadOnly);
        let depth = deps.get(TrackedImage::DepthCopy, slot)?;

        let mut attachments = Vec::with_capacity(TARGETS.len());
        for (image, _, _) in TARGETS {
            deps.transition(cmd, image, slot, ImageState::ColorAttachment)?;
            attachments.push(color_attachment(deps.get(image, slot)?.view, [0.0; 4]));
        }

        let depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(depth.view)
            .image_layout(vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::NONE);

        begin_rendering(cmd, depth.extent, &attachments, Some(&depth_attachment));
        cmd.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
        draw_scene(cmd, ctx.scene, pipeline.layout, PUSH_STAGES, slot);
        cmd.end_rendering();

        for (image, _, _) in TARGETS {
            deps.transition(cmd, image, slot, ImageState::ShaderReadOnly)?;
        }
        Ok(())
    }

    fn recreate_swapchain(&mut self, ctx: &mut PassContext<'_>) -> RenderResult<()> {
        if self.extent == ctx.extent() {
            return Ok(());
        }
        self.allocate_targets(ctx)
    }

    fn cleanup(&mut self, _ctx: &mut PassContext<'_>) {
        self.pipeline = None;
        self.extent = vk::Extent2D::default();
    }
}
