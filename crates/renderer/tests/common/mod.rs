//! Scripted frame backend and probe passes for driving the scheduler and
//! pass pipeline without a GPU.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use ash::vk;

use deferred_renderer::{
    AcquireOutcome, FrameBackend, FrameInfo, FrameRecorder, PassContextFamily, PassPipeline,
    PassSchedule, PresentOutcome, RenderError, RenderPass, RenderResult, SurfaceTargets,
};

pub type Log = Rc<RefCell<Vec<String>>>;

pub fn new_log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

/// Log entries starting with `prefix`.
pub fn entries(log: &Log, prefix: &str) -> Vec<String> {
    log.borrow()
        .iter()
        .filter(|entry| entry.starts_with(prefix))
        .cloned()
        .collect()
}

pub fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

pub fn surface(extent: vk::Extent2D) -> SurfaceTargets {
    SurfaceTargets {
        format: vk::Format::B8G8R8A8_SRGB,
        extent,
        images: vec![vk::Image::null(); 3],
        views: vec![vk::ImageView::null(); 3],
    }
}

/// Backend whose acquire and present results follow a script. Unscripted
/// calls succeed. Commands are the slot index.
pub struct ScriptedBackend {
    pub log: Log,
    pub slots: usize,
    pub acquires: VecDeque<AcquireOutcome>,
    pub presents: VecDeque<PresentOutcome>,
    pub window_extent: vk::Extent2D,
    next_image: u32,
}

impl ScriptedBackend {
    pub fn new(slots: usize, log: Log) -> Self {
        Self {
            log,
            slots,
            acquires: VecDeque::new(),
            presents: VecDeque::new(),
            window_extent: extent(800, 600),
            next_image: 0,
        }
    }

    fn push(&self, entry: String) {
        self.log.borrow_mut().push(entry);
    }
}

impl FrameBackend for ScriptedBackend {
    type Commands = usize;

    fn frames_in_flight(&self) -> usize {
        self.slots
    }

    fn wait_for_slot(&mut self, slot: usize) -> RenderResult<()> {
        self.push(format!("wait {slot}"));
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> RenderResult<AcquireOutcome> {
        self.push(format!("acquire {slot}"));
        let outcome = self.acquires.pop_front().unwrap_or(AcquireOutcome::Ready {
            image_index: self.next_image,
            suboptimal: false,
        });
        self.next_image = (self.next_image + 1) % 3;
        Ok(outcome)
    }

    fn begin_commands(&mut self, slot: usize) -> RenderResult<usize> {
        self.push(format!("begin {slot}"));
        Ok(slot)
    }

    fn submit(&mut self, slot: usize, _image_index: u32) -> RenderResult<()> {
        self.push(format!("submit {slot}"));
        Ok(())
    }

    fn present(&mut self, slot: usize, _image_index: u32) -> RenderResult<PresentOutcome> {
        self.push(format!("present {slot}"));
        Ok(self.presents.pop_front().unwrap_or(PresentOutcome::Presented))
    }

    fn wait_idle(&mut self) -> RenderResult<()> {
        self.push("wait_idle".to_string());
        Ok(())
    }

    fn recreate_surface(&mut self) -> RenderResult<SurfaceTargets> {
        self.push("recreate_surface".to_string());
        Ok(surface(self.window_extent))
    }
}

/// Pass context family used by the probe passes.
pub struct Probes;

pub struct ProbeContext<'a> {
    pub log: &'a Log,
    pub surface: &'a SurfaceTargets,
    pub frame: Option<&'a FrameInfo<usize>>,
}

impl PassContextFamily for Probes {
    type Context<'a> = ProbeContext<'a>;
}

/// Pass that logs every lifecycle call and sizes its "attachment" after
/// the surface.
pub struct ProbePass {
    pub name: &'static str,
    pub schedule: PassSchedule,
    pub attachment: Rc<Cell<vk::Extent2D>>,
    pub fail_execute: bool,
}

impl ProbePass {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            schedule: PassSchedule::PerFrame,
            attachment: Rc::new(Cell::new(vk::Extent2D::default())),
            fail_execute: false,
        }
    }

    pub fn setup(name: &'static str) -> Self {
        Self {
            schedule: PassSchedule::Setup,
            ..Self::new(name)
        }
    }
}

impl RenderPass<Probes> for ProbePass {
    fn name(&self) -> &'static str {
        self.name
    }

    fn schedule(&self) -> PassSchedule {
        self.schedule
    }

    fn initialize(&mut self, ctx: &mut ProbeContext<'_>) -> RenderResult<()> {
        self.attachment.set(ctx.surface.extent);
        ctx.log.borrow_mut().push(format!("init {}", self.name));
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ProbeContext<'_>) -> RenderResult<()> {
        if self.fail_execute {
            return Err(RenderError::MissingDependency(self.name.to_string()));
        }
        let entry = match ctx.frame {
            Some(frame) => format!("exec {} slot {}", self.name, frame.frame_index),
            None => format!("exec {}", self.name),
        };
        ctx.log.borrow_mut().push(entry);
        Ok(())
    }

    fn recreate_swapchain(&mut self, ctx: &mut ProbeContext<'_>) -> RenderResult<()> {
        self.attachment.set(ctx.surface.extent);
        ctx.log.borrow_mut().push(format!("recreate {}", self.name));
        Ok(())
    }

    fn cleanup(&mut self, ctx: &mut ProbeContext<'_>) {
        ctx.log.borrow_mut().push(format!("cleanup {}", self.name));
    }
}

/// Drives a probe pipeline as the scheduler's recorder.
pub struct ProbeRecorder {
    pub pipeline: PassPipeline<Probes>,
    pub log: Log,
    pub surface: SurfaceTargets,
}

impl ProbeRecorder {
    /// Initializes `pipeline` against `surface` and runs its setup passes.
    pub fn ready(pipeline: PassPipeline<Probes>, log: Log, surface: SurfaceTargets) -> Self {
        let mut recorder = Self {
            pipeline,
            log,
            surface,
        };
        let mut ctx = ProbeContext {
            log: &recorder.log,
            surface: &recorder.surface,
            frame: None,
        };
        recorder
            .pipeline
            .initialize(&mut ctx)
            .expect("probe pipeline initializes");
        recorder
            .pipeline
            .run_setup(&mut ctx)
            .expect("probe setup passes run");
        recorder
    }
}

impl FrameRecorder<usize> for ProbeRecorder {
    fn record(&mut self, frame: &FrameInfo<usize>) -> RenderResult<()> {
        let mut ctx = ProbeContext {
            log: &self.log,
            surface: &self.surface,
            frame: Some(frame),
        };
        self.pipeline.execute(&mut ctx)
    }

    fn recreate_swapchain(&mut self, surface: &SurfaceTargets) -> RenderResult<()> {
        self.surface = surface.clone();
        let mut ctx = ProbeContext {
            log: &self.log,
            surface: &self.surface,
            frame: None,
        };
        self.pipeline.recreate_swapchain(&mut ctx)
    }
}

/// The deferred pass order with probe passes.
pub fn deferred_probes() -> (PassPipeline<Probes>, Vec<Rc<Cell<vk::Extent2D>>>) {
    let passes = [
        ProbePass::setup("shadow"),
        ProbePass::setup("environment"),
        ProbePass::new("depth_prepass"),
        ProbePass::new("gbuffer"),
        ProbePass::new("lighting"),
        ProbePass::new("tone_mapping"),
    ];
    let mut attachments = Vec::new();
    let mut pipeline = PassPipeline::new();
    for pass in passes {
        attachments.push(pass.attachment.clone());
        pipeline.push(pass);
    }
    (pipeline, attachments)
}
