//! Full-screen lighting pass.
//!
//! Reconstructs world positions from the depth copy, shades the G-buffer with
//! the directional light plus irradiance-map ambient, and writes an HDR
//! target. Background pixels sample the environment map.
//!
//! Set 1:
//!
//! ```text
//! 0 albedo   1 normal   2 params   3 depth copy   4 irradiance   5 environment
//! ```

use ash::vk;
use tracing::debug;

use deferred_rhi::descriptor::{
    DescriptorBindingBuilder, DescriptorPool, DescriptorSetLayout, DescriptorWriter,
};
use deferred_rhi::pipeline::{CullMode, GraphicsPipelineBuilder, PipelineLayout};
use deferred_rhi::shader::ShaderStage;
use deferred_rhi::texture::{Sampler, Texture, TextureDesc};

use super::{
    GpuPasses, PassContext, PipelineHandles, RenderPass, begin_rendering, color_attachment,
};
use crate::error::{RenderError, RenderResult};
use crate::layout::{ImageState, TrackedImage};
use crate::ubo::LightPush;

const NAME: &str = "lighting";
pub const HDR_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

/// Inputs in binding order.
const INPUTS: [TrackedImage; 6] = [
    TrackedImage::Albedo,
    TrackedImage::Normal,
    TrackedImage::Params,
    TrackedImage::DepthCopy,
    TrackedImage::Irradiance,
    TrackedImage::Environment,
];

#[derive(Default)]
pub struct LightingPass {
    pipeline: Option<PipelineHandles>,
    sets: Vec<vk::DescriptorSet>,
    nearest: vk::Sampler,
    linear: vk::Sampler,
    extent: vk::Extent2D,
}

impl LightingPass {
    pub fn new() -> Self {
        Self::default()
    }

    fn create_objects(&mut self, ctx: &mut PassContext<'_>) -> RenderResult<()> {
        let device = ctx.shared.device.clone();
        let slots = ctx.shared.frames_in_flight as u32;

        let bindings: Vec<_> = (0..INPUTS.len() as u32)
            .map(|binding| {
                DescriptorBindingBuilder::combined_image_sampler(
                    binding,
                    vk::ShaderStageFlags::FRAGMENT,
                )
            })
            .collect();
        let set_layout = DescriptorSetLayout::new(device.clone(), &bindings)?;
        let pool = DescriptorPool::new(
            device.clone(),
            slots,
            &[vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: slots * INPUTS.len() as u32,
            }],
        )?;
        self.sets = pool.allocate(&vec![set_layout.handle(); slots as usize])?;

        let nearest = Sampler::nearest(device.clone())?;
        let linear = Sampler::linear(device.clone(), vk::SamplerAddressMode::CLAMP_TO_EDGE)?;
        self.nearest = nearest.handle();
        self.linear = linear.handle();

        let vertex = ctx.load_shader("fullscreen.vert", ShaderStage::Vertex)?;
        let fragment = ctx.load_shader("lighting.frag", ShaderStage::Fragment)?;
        let layout = PipelineLayout::new(
            device.clone(),
            &[ctx.scene.set_layout(), set_layout.handle()],
            &[PipelineLayout::push_range::<LightPush>(
                vk::ShaderStageFlags::FRAGMENT,
            )],
        )?;
        let pipeline = GraphicsPipelineBuilder::new()
            .vertex_shader(&vertex)
            .fragment_shader(&fragment)
            .cull_mode(CullMode::None)
            .color_attachment_format(HDR_FORMAT)
            .build(device, &layout, NAME)?;

        ctx.registry
            .retain("lighting.descriptors", (pool, set_layout));
        ctx.registry.retain("lighting.samplers", (nearest, linear));
        self.pipeline = Some(PipelineHandles::register(
            ctx.registry,
            "lighting.pipeline",
            pipeline,
            layout,
        ));
        Ok(())
    }

    fn allocate_targets(&mut self, ctx: &mut PassContext<'_>) -> RenderResult<()> {
        let extent = ctx.extent();
        for slot in 0..ctx.shared.frames_in_flight {
            let hdr = Texture::new(
                ctx.shared.device.clone(),
                &TextureDesc::color_target(format!("hdr {slot}"), extent, HDR_FORMAT),
            )?;
            ctx.dependencies
                .publish(NAME, TrackedImage::Hdr, slot, hdr.handle());
            ctx.registry.retain(format!("lighting.hdr.{slot}"), hdr);
        }
        self.extent = extent;
        debug!("HDR targets allocated at {}x{}", extent.width, extent.height);
        Ok(())
    }

    /// Points every slot's set at the current producer outputs.
    fn write_descriptors(&self, ctx: &PassContext<'_>) -> RenderResult<()> {
        for (slot, &set) in self.sets.iter().enumerate() {
            let mut writer = DescriptorWriter::new(set);
            for (binding, image) in INPUTS.into_iter().enumerate() {
                let texture = ctx.dependencies.get(image, slot)?;
                let (sampler, layout) = match image {
                    TrackedImage::DepthCopy => {
                        (self.nearest, vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL)
                    }
                    TrackedImage::Irradiance | TrackedImage::Environment => {
                        (self.linear, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    }
                    _ => (self.nearest, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
                };
                writer = writer.sampled_image(binding as u32, sampler, texture.view, layout);
            }
            writer.commit(ctx.shared.device);
        }
        debug!("Lighting inputs bound for {} slot(s)", self.sets.len());
        Ok(())
    }
}

impl RenderPass<GpuPasses> for LightingPass {
    fn name(&self) -> &'static str {
        NAME
    }

    fn initialize(&mut self, ctx: &mut PassContext<'_>) -> RenderResult<()> {
        self.create_objects(ctx)?;
        self.allocate_targets(ctx)?;
        self.write_descriptors(ctx)
    }

    fn execute(&mut self, ctx: &mut PassContext<'_>) -> RenderResult<()> {
        let pipeline = self.pipeline.ok_or(RenderError::PipelineNotInitialized)?;
        let frame = ctx.frame()?;
        let cmd = &frame.command_buffer;
        let slot = frame.frame_index;
        let deps = &mut *ctx.dependencies;

        for image in INPUTS {
            let expected = match image {
                TrackedImage::DepthCopy => ImageState::DepthReadOnly,
                _ => ImageState::ShaderReadOnly,
            };
            deps.require_layout(image, slot, expected);
        }

        deps.transition(cmd, TrackedImage::Hdr, slot, ImageState::ColorAttachment)?;
        let hdr = deps.get(TrackedImage::Hdr, slot)?;
        let attachment = color_attachment(hdr.view, [0.0, 0.0, 0.0, 1.0]);

        begin_rendering(cmd, hdr.extent, &[attachment], None);
        cmd.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
        cmd.bind_descriptor_sets(
            vk::PipelineBindPoint::GRAPHICS,
            pipeline.layout,
            0,
            &[ctx.scene.frame_set(slot), self.sets[slot]],
        );
        cmd.push_constants(
            pipeline.layout,
            vk::ShaderStageFlags::FRAGMENT,
            &LightPush::from_light(ctx.shared.light),
        );
        cmd.draw(3, 1);
        cmd.end_rendering();

        deps.transition(cmd, TrackedImage::Hdr, slot, ImageState::ShaderReadOnly)?;
        Ok(())
    }

    fn recreate_swapchain(&mut self, ctx: &mut PassContext<'_>) -> RenderResult<()> {
        if self.extent != ctx.extent() {
            self.allocate_targets(ctx)?;
        }
        self.write_descriptors(ctx)
    }

    fn cleanup(&mut self, _ctx: &mut PassContext<'_>) {
        self.pipeline = None;
        self.sets.clear();
        self.nearest = vk::Sampler::null();
        self.linear = vk::Sampler::null();
        self.extent = vk::Extent2D::default();
    }
}
