//! Depth pre-pass.
//!
//! Fills a per-slot live depth target, then copies it into a per-slot depth
//! copy that the G-buffer pass tests against and the lighting pass samples.

use ash::vk;
use tracing::debug;

use deferred_rhi::pipeline::{CompareOp, CullMode, GraphicsPipelineBuilder, PipelineLayout};
use deferred_rhi::shader::ShaderStage;
use deferred_rhi::texture::{DEPTH_FORMAT, Texture, TextureDesc};

use super::{GpuPasses, PassContext, PipelineHandles, RenderPass, begin_rendering, draw_scene};
use crate::error::{RenderError, RenderResult};
use crate::layout::{ImageState, TrackedImage};
use crate::ubo::DrawPush;

const NAME: &str = "depth_prepass";
const PUSH_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::VERTEX;

#[derive(Default)]
pub struct DepthPrepass {
    pipeline: Option<PipelineHandles>,
    extent: vk::Extent2D,
}

impl DepthPrepass {
    pub fn new() -> Self {
        Self::default()
    }

    fn create_pipeline(ctx: &mut PassContext<'_>) -> RenderResult<PipelineHandles> {
        let device = ctx.shared.device.clone();
        let vertex = ctx.load_shader("depth.vert", ShaderStage::Vertex)?;

        let layout = PipelineLayout::new(
            device.clone(),
            &[ctx.scene.set_layout()],
            &[PipelineLayout::push_range::<DrawPush>(PUSH_STAGES)],
        )?;
        let pipeline = GraphicsPipelineBuilder::new()
            .vertex_shader(&vertex)
            .cull_mode(CullMode::Back)
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(CompareOp::Less)
            .depth_attachment_format(DEPTH_FORMAT)
            .build(device, &layout, NAME)?;

        Ok(PipelineHandles::register(
            ctx.registry,
            "depth_prepass.pipeline",
            pipeline,
            layout,
        ))
    }

    /// (Re)allocates the live depth and the depth copy for every slot.
    fn allocate_targets(&mut self, ctx: &mut PassContext<'_>) -> RenderResult<()> {
        let extent = ctx.extent();
        let device = ctx.shared.device;

        for slot in 0..ctx.shared.frames_in_flight {
            let depth = Texture::new(
                device.clone(),
                &TextureDesc::depth(format!("depth {slot}"), extent)
                    .with_usage(vk::ImageUsageFlags::TRANSFER_SRC),
            )?;
            let copy = Texture::new(
                device.clone(),
                &TextureDesc::depth(format!("depth copy {slot}"), extent)
                    .with_usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED),
            )?;

            ctx.dependencies
                .publish(NAME, TrackedImage::Depth, slot, depth.handle());
            ctx.dependencies
                .publish(NAME, TrackedImage::DepthCopy, slot, copy.handle());
            ctx.registry
                .retain(format!("depth_prepass.depth.{slot}"), depth);
            ctx.registry
                .retain(format!("depth_prepass.depth_copy.{slot}"), copy);
        }

        self.extent = extent;
        debug!(
            "Depth targets allocated at {}x{} for {} slot(s)",
            extent.width, extent.height, ctx.shared.frames_in_flight
        );
        Ok(())
    }
}

impl RenderPass<GpuPasses> for DepthPrepass {
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

        let depth = deps.get(TrackedImage::Depth, slot)?;
        let copy = deps.get(TrackedImage::DepthCopy, slot)?;

        deps.transition(cmd, TrackedImage::Depth, slot, ImageState::DepthAttachment)?;

        let depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(depth.view)
            .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            });
        begin_rendering(cmd, depth.extent, &[], Some(&depth_attachment));
        cmd.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
        draw_scene(cmd, ctx.scene, pipeline.layout, PUSH_STAGES, slot);
        cmd.end_rendering();

        deps.transition(cmd, TrackedImage::Depth, slot, ImageState::General)?;
        deps.transition(cmd, TrackedImage::Depth, slot, ImageState::TransferSrc)?;
        deps.transition(cmd, TrackedImage::DepthCopy, slot, ImageState::TransferDst)?;

        let layers = vk::ImageSubresourceLayers::default()
            .aspect_mask(vk::ImageAspectFlags::DEPTH)
            .layer_count(1);
        let region = vk::ImageCopy::default()
            .src_subresource(layers)
            .dst_subresource(layers)
            .extent(vk::Extent3D {
                width: depth.extent.width,
                height: depth.extent.height,
                depth: 1,
            });
        cmd.copy_image(
            depth.image,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            copy.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );

        deps.transition(cmd, TrackedImage::DepthCopy, slot, ImageState::DepthReadOnly)?;
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
