//! Environment precomputation.
//!
//! Runs once during scene setup: a compute shader paints a procedural sky
//! into the environment cube, and a second one convolves it into the
//! irradiance cube used for ambient light. Both cubes are shared by every
//! frame slot and end shader-read-only.

use ash::vk;
use tracing::{debug, info};

use deferred_rhi::command::CommandBuffer;
use deferred_rhi::descriptor::{
    DescriptorBindingBuilder, DescriptorPool, DescriptorSetLayout, DescriptorWriter,
};
use deferred_rhi::pipeline::{Pipeline, PipelineLayout};
use deferred_rhi::shader::ShaderStage;
use deferred_rhi::texture::{Sampler, Texture, TextureDesc, TextureRef};

use super::{GpuPasses, PassContext, PassSchedule, PipelineHandles, RenderPass};
use crate::dependencies::PassDependencies;
use crate::error::{RenderError, RenderResult};
use crate::layout::{ImageState, TrackedImage};
use crate::ubo::EnvironmentPush;

const NAME: &str = "environment";
const CUBE_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
/// Matches `numthreads` in both compute shaders.
const WORKGROUP_SIZE: u32 = 8;

/// One compute step: pipeline, its set, and the cube it writes.
#[derive(Clone, Copy, Debug)]
struct ComputeStep {
    pipeline: PipelineHandles,
    set: vk::DescriptorSet,
    target: TrackedImage,
}

#[derive(Default)]
pub struct EnvironmentPass {
    sky: Option<ComputeStep>,
    irradiance: Option<ComputeStep>,
}

impl EnvironmentPass {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_cubes(ctx: &mut PassContext<'_>) -> RenderResult<(TextureRef, TextureRef)> {
        let device = ctx.shared.device;
        let config = ctx.shared.config;

        let environment = Texture::new(
            device.clone(),
            &TextureDesc::storage_cube("environment", config.environment_size, CUBE_FORMAT),
        )?;
        let irradiance = Texture::new(
            device.clone(),
            &TextureDesc::storage_cube("irradiance", config.irradiance_size, CUBE_FORMAT),
        )?;
        let handles = (environment.handle(), irradiance.handle());

        ctx.dependencies
            .publish(NAME, TrackedImage::Environment, 0, handles.0);
        ctx.dependencies
            .publish(NAME, TrackedImage::Irradiance, 0, handles.1);
        ctx.registry.retain("environment.cube", environment);
        ctx.registry.retain("environment.irradiance", irradiance);
        Ok(handles)
    }

    fn create_compute(
        ctx: &mut PassContext<'_>,
        shader: &str,
        set_layout: &DescriptorSetLayout,
    ) -> RenderResult<PipelineHandles> {
        let device = ctx.shared.device.clone();
        let module = ctx.load_shader(shader, ShaderStage::Compute)?;
        let layout = PipelineLayout::new(
            device.clone(),
            &[set_layout.handle()],
            &[PipelineLayout::push_range::<EnvironmentPush>(
                vk::ShaderStageFlags::COMPUTE,
            )],
        )?;
        let pipeline = Pipeline::compute(device, &module, &layout, shader)?;
        Ok(PipelineHandles::register(
            ctx.registry,
            &format!("environment.{shader}"),
            pipeline,
            layout,
        ))
    }
}

/// Writes one cube: Undefined -> General, dispatch over every face, then
/// General -> ShaderReadOnly.
fn record_step(
    cmd: &CommandBuffer,
    deps: &mut PassDependencies,
    step: &ComputeStep,
    push: EnvironmentPush,
) -> RenderResult<()> {
    let groups = push.face_size.div_ceil(WORKGROUP_SIZE);

    deps.transition(cmd, step.target, 0, ImageState::General)?;
    cmd.bind_pipeline(vk::PipelineBindPoint::COMPUTE, step.pipeline.pipeline);
    cmd.bind_descriptor_sets(
        vk::PipelineBindPoint::COMPUTE,
        step.pipeline.layout,
        0,
        &[step.set],
    );
    cmd.push_constants(step.pipeline.layout, vk::ShaderStageFlags::COMPUTE, &push);
    cmd.dispatch(groups, groups, 6);
    deps.transition(cmd, step.target, 0, ImageState::ShaderReadOnly)?;
    Ok(())
}

impl RenderPass<GpuPasses> for EnvironmentPass {
    fn name(&self) -> &'static str {
        NAME
    }

    fn schedule(&self) -> PassSchedule {
        PassSchedule::Setup
    }

    fn initialize(&mut self, ctx: &mut PassContext<'_>) -> RenderResult<()> {
        let device = ctx.shared.device.clone();
        let (environment, irradiance) = Self::allocate_cubes(ctx)?;
        let storage_view = |cube: &TextureRef| {
            cube.storage_view.ok_or_else(|| {
                RenderError::MissingDependency("storage view of an environment cube".into())
            })
        };

        let sky_layout = DescriptorSetLayout::new(
            device.clone(),
            &[DescriptorBindingBuilder::storage_image(
                0,
                vk::ShaderStageFlags::COMPUTE,
            )],
        )?;
        let irradiance_layout = DescriptorSetLayout::new(
            device.clone(),
            &[
                DescriptorBindingBuilder::combined_image_sampler(
                    0,
                    vk::ShaderStageFlags::COMPUTE,
                ),
                DescriptorBindingBuilder::storage_image(1, vk::ShaderStageFlags::COMPUTE),
            ],
        )?;
        let pool = DescriptorPool::new(
            device.clone(),
            2,
            &[
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::STORAGE_IMAGE,
                    descriptor_count: 2,
                },
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    descriptor_count: 1,
                },
            ],
        )?;
        let sets = pool.allocate(&[sky_layout.handle(), irradiance_layout.handle()])?;
        let sampler = Sampler::linear(device.clone(), vk::SamplerAddressMode::CLAMP_TO_EDGE)?;

        DescriptorWriter::new(sets[0])
            .storage_image(0, storage_view(&environment)?)
            .commit(&device);
        DescriptorWriter::new(sets[1])
            .sampled_image(
                0,
                sampler.handle(),
                environment.view,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
            .storage_image(1, storage_view(&irradiance)?)
            .commit(&device);

        let sky_pipeline = Self::create_compute(ctx, "sky.comp", &sky_layout)?;
        let irradiance_pipeline = Self::create_compute(ctx, "irradiance.comp", &irradiance_layout)?;

        ctx.registry.retain(
            "environment.descriptors",
            (pool, sky_layout, irradiance_layout),
        );
        ctx.registry.retain("environment.sampler", sampler);

        self.sky = Some(ComputeStep {
            pipeline: sky_pipeline,
            set: sets[0],
            target: TrackedImage::Environment,
        });
        self.irradiance = Some(ComputeStep {
            pipeline: irradiance_pipeline,
            set: sets[1],
            target: TrackedImage::Irradiance,
        });
        Ok(())
    }

    fn execute(&mut self, ctx: &mut PassContext<'_>) -> RenderResult<()> {
        let (Some(sky), Some(irradiance)) = (self.sky, self.irradiance) else {
            return Err(RenderError::PipelineNotInitialized);
        };

        let sun = (-ctx.shared.light.direction).normalize_or_zero().to_array();
        let config = ctx.shared.config;
        let deps = &mut *ctx.dependencies;

        // Both cubes are fully rewritten, so earlier contents are discarded.
        deps.layouts
            .register(TrackedImage::Environment, 0, ImageState::Undefined);
        deps.layouts
            .register(TrackedImage::Irradiance, 0, ImageState::Undefined);

        ctx.shared
            .command_pool
            .submit_immediate(|cmd| -> RenderResult<()> {
                record_step(
                    cmd,
                    deps,
                    &sky,
                    EnvironmentPush {
                        sun_direction: sun,
                        face_size: config.environment_size,
                    },
                )?;
                record_step(
                    cmd,
                    deps,
                    &irradiance,
                    EnvironmentPush {
                        sun_direction: sun,
                        face_size: config.irradiance_size,
                    },
                )
            })?;

        info!(
            "Environment precomputed ({}px sky, {}px irradiance)",
            config.environment_size, config.irradiance_size
        );
        Ok(())
    }

    fn recreate_swapchain(&mut self, _ctx: &mut PassContext<'_>) -> RenderResult<()> {
        debug!("Environment maps do not depend on the surface");
        Ok(())
    }

    fn cleanup(&mut self, _ctx: &mut PassContext<'_>) {
        self.sky = None;
        self.irradiance = None;
    }
}
