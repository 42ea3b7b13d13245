//! HDR to display conversion.
//!
//! Samples the lighting output, applies exposure and the selected operator,
//! and writes the acquired surface image, leaving it ready to present.

use ash::vk;
use tracing::debug;

use deferred_core::{RendererConfig, ToneMapOperator};
use deferred_rhi::descriptor::{
    DescriptorBindingBuilder, DescriptorPool, DescriptorSetLayout, DescriptorWriter,
};
use deferred_rhi::pipeline::{CullMode, GraphicsPipelineBuilder, PipelineLayout};
use deferred_rhi::shader::ShaderStage;
use deferred_rhi::texture::Sampler;

use super::{
    GpuPasses, PassContext, PipelineHandles, RenderPass, begin_rendering, color_attachment,
};
use crate::error::{RenderError, RenderResult};
use crate::layout::{ImageState, TrackedImage, record_barrier, untracked_transition};
use crate::ubo::ToneMapPush;

const NAME: &str = "tone_mapping";

/// Exposure and operator applied by the tone mapping pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ToneSettings {
    pub exposure: f32,
    pub operator: ToneMapOperator,
}

impl ToneSettings {
    pub fn from_config(config: &RendererConfig) -> Self {
        Self {
            exposure: config.exposure,
            operator: config.tone_mapping,
        }
    }
}

#[derive(Default)]
pub struct ToneMappingPass {
    pipeline: Option<PipelineHandles>,
    set_layout: vk::DescriptorSetLayout,
    sets: Vec<vk::DescriptorSet>,
    sampler: vk::Sampler,
    format: vk::Format,
}

impl ToneMappingPass {
    pub fn new() -> Self {
        Self::default()
    }

    fn create_descriptors(&mut self, ctx: &mut PassContext<'_>) -> RenderResult<()> {
        let device = ctx.shared.device.clone();
        let slots = ctx.shared.frames_in_flight as u32;

        let set_layout = DescriptorSetLayout::new(
            device.clone(),
            &[DescriptorBindingBuilder::combined_image_sampler(
                0,
                vk::ShaderStageFlags::FRAGMENT,
            )],
        )?;
        let pool = DescriptorPool::new(
            device.clone(),
            slots,
            &[vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: slots,
            }],
        )?;
        self.sets = pool.allocate(&vec![set_layout.handle(); slots as usize])?;
        self.set_layout = set_layout.handle();

        let sampler = Sampler::nearest(device)?;
        self.sampler = sampler.handle();

        ctx.registry
            .retain("tone_mapping.descriptors", (pool, set_layout));
        ctx.registry.retain("tone_mapping.sampler", sampler);
        Ok(())
    }

    /// Builds the pipeline for the current surface format.
    fn create_pipeline(&mut self, ctx: &mut PassContext<'_>) -> RenderResult<()> {
        let device = ctx.shared.device.clone();
        let format = ctx.shared.surface.format;
        let vertex = ctx.load_shader("fullscreen.vert", ShaderStage::Vertex)?;
        let fragment = ctx.load_shader("tonemap.frag", ShaderStage::Fragment)?;

        let layout = PipelineLayout::new(
            device.clone(),
            &[self.set_layout],
            &[PipelineLayout::push_range::<ToneMapPush>(
                vk::ShaderStageFlags::FRAGMENT,
            )],
        )?;
        let pipeline = GraphicsPipelineBuilder::new()
            .vertex_shader(&vertex)
            .fragment_shader(&fragment)
            .cull_mode(CullMode::None)
            .color_attachment_format(format)
            .build(device, &layout, NAME)?;

        self.pipeline = Some(PipelineHandles::register(
            ctx.registry,
            "tone_mapping.pipeline",
            pipeline,
            layout,
        ));
        self.format = format;
        debug!("Tone mapping pipeline targets {:?}", format);
        Ok(())
    }

    fn write_descriptors(&self, ctx: &PassContext<'_>) -> RenderResult<()> {
        for (slot, &set) in self.sets.iter().enumerate() {
            let hdr = ctx.dependencies.get(TrackedImage::Hdr, slot)?;
            DescriptorWriter::new(set)
                .sampled_image(
                    0,
                    self.sampler,
                    hdr.view,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                )
                .commit(ctx.shared.device);
        }
        Ok(())
    }
}

impl RenderPass<GpuPasses> for ToneMappingPass {
    fn name(&self) -> &'static str {
        NAME
    }

    fn initialize(&mut self, ctx: &mut PassContext<'_>) -> RenderResult<()> {
        self.create_descriptors(ctx)?;
        self.create_pipeline(ctx)?;
        self.write_descriptors(ctx)
    }

    fn execute(&mut self, ctx: &mut PassContext<'_>) -> RenderResult<()> {
        let pipeline = self.pipeline.ok_or(RenderError::PipelineNotInitialized)?;
        let frame = ctx.frame()?;
        let cmd = &frame.command_buffer;
        let slot = frame.frame_index;

        ctx.dependencies
            .require_layout(TrackedImage::Hdr, slot, ImageState::ShaderReadOnly);

        let surface = ctx.shared.surface;
        let (image, view) = surface.image(frame.image_index).ok_or_else(|| {
            RenderError::MissingDependency(format!("surface image {}", frame.image_index))
        })?;
        let range = vk::ImageSubresourceRange::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .level_count(1)
            .layer_count(1);

        // The previous contents are never read, so every frame starts from
        // Undefined.
        record_barrier(
            cmd,
            image,
            range,
            &untracked_transition(ImageState::Undefined, ImageState::ColorAttachment),
        );

        let attachment = color_attachment(view, [0.0, 0.0, 0.0, 1.0]);
        begin_rendering(cmd, surface.extent, &[attachment], None);
        cmd.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
        cmd.bind_descriptor_sets(
            vk::PipelineBindPoint::GRAPHICS,
            pipeline.layout,
            0,
            &[self.sets[slot]],
        );
        let tone = ctx.shared.tone;
        cmd.push_constants(
            pipeline.layout,
            vk::ShaderStageFlags::FRAGMENT,
            &ToneMapPush::new(tone.exposure, tone.operator),
        );
        cmd.draw(3, 1);
        cmd.end_rendering();

        record_barrier(
            cmd,
            image,
            range,
            &untracked_transition(ImageState::ColorAttachment, ImageState::Present),
        );
        Ok(())
    }

    fn recreate_swapchain(&mut self, ctx: &mut PassContext<'_>) -> RenderResult<()> {
        if self.format != ctx.shared.surface.format {
            self.create_pipeline(ctx)?;
        }
        self.write_descriptors(ctx)
    }

    fn cleanup(&mut self, _ctx: &mut PassContext<'_>) {
        self.pipeline = None;
        self.sets.clear();
        self.set_layout = vk::DescriptorSetLayout::null();
        self.sampler = vk::Sampler::null();
        self.format = vk::Format::UNDEFINED;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_follow_config() {
        let config = RendererConfig {
            exposure: 2.5,
            tone_mapping: ToneMapOperator::Reinhard,
            ..RendererConfig::default()
        };
        let settings = ToneSettings::from_config(&config);
        assert_eq!(settings.exposure, 2.5);
        assert_eq!(settings.operator, ToneMapOperator::Reinhard);
    }
}
