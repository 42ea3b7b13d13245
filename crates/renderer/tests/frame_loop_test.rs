//! Integration tests for the frame loop: slot rotation, stale surfaces,
//! recreation order and resize propagation.

mod common;

use deferred_renderer::{AcquireOutcome, FrameScheduler, FrameStatus, PresentOutcome, SlotState};

use common::{
    ProbePass, ProbeRecorder, ScriptedBackend, deferred_probes, entries, extent, new_log, surface,
};

fn scheduler_with_probes(slots: usize) -> (FrameScheduler<ScriptedBackend>, ProbeRecorder) {
    let log = new_log();
    let backend = ScriptedBackend::new(slots, log.clone());
    let initial = surface(backend.window_extent);
    let (pipeline, _) = deferred_probes();
    let recorder = ProbeRecorder::ready(pipeline, log, initial);
    recorder.log.borrow_mut().clear();
    (FrameScheduler::new(backend), recorder)
}

#[test]
fn test_two_slots_alternate_and_every_frame_waits() {
    let (mut scheduler, mut recorder) = scheduler_with_probes(2);

    for _ in 0..5 {
        assert_eq!(
            scheduler.draw_frame(&mut recorder).unwrap(),
            FrameStatus::Presented
        );
    }

    assert_eq!(
        entries(&recorder.log, "wait "),
        vec!["wait 0", "wait 1", "wait 0", "wait 1", "wait 0"],
        "every frame waits on its own slot fence"
    );
    assert_eq!(
        entries(&recorder.log, "exec tone_mapping"),
        vec![
            "exec tone_mapping slot 0",
            "exec tone_mapping slot 1",
            "exec tone_mapping slot 0",
            "exec tone_mapping slot 1",
            "exec tone_mapping slot 0",
        ]
    );
    assert_eq!(scheduler.frame_counter(), 5);
    assert_eq!(scheduler.current_slot(), 1);
}

#[test]
fn test_frame_steps_run_in_protocol_order() {
    let (mut scheduler, mut recorder) = scheduler_with_probes(2);
    scheduler.draw_frame(&mut recorder).unwrap();

    assert_eq!(
        *recorder.log.borrow(),
        vec![
            "wait 0",
            "acquire 0",
            "begin 0",
            "exec depth_prepass slot 0",
            "exec gbuffer slot 0",
            "exec lighting slot 0",
            "exec tone_mapping slot 0",
            "submit 0",
            "present 0",
        ],
        "setup passes never run per frame"
    );
}

#[test]
fn test_stale_acquire_skips_frame_and_recreates_on_next_call() {
    let (mut scheduler, mut recorder) = scheduler_with_probes(2);
    scheduler.draw_frame(&mut recorder).unwrap();
    scheduler.draw_frame(&mut recorder).unwrap();
    recorder.log.borrow_mut().clear();

    scheduler.backend_mut().acquires.push_back(AcquireOutcome::OutOfDate);
    assert_eq!(
        scheduler.draw_frame(&mut recorder).unwrap(),
        FrameStatus::Skipped
    );
    assert_eq!(scheduler.frame_counter(), 2, "a skipped frame is not counted");
    assert!(entries(&recorder.log, "begin").is_empty());
    assert!(entries(&recorder.log, "submit").is_empty());
    assert!(scheduler.is_recreate_pending());
    assert_eq!(scheduler.slot_state(0), Some(SlotState::Idle));

    recorder.log.borrow_mut().clear();
    assert_eq!(
        scheduler.draw_frame(&mut recorder).unwrap(),
        FrameStatus::Presented
    );
    let log = recorder.log.borrow().clone();
    assert_eq!(&log[..3], ["wait 0", "wait_idle", "recreate_surface"]);
    assert_eq!(scheduler.frame_counter(), 3);
    assert!(!scheduler.is_recreate_pending());
}

#[test]
fn test_suboptimal_present_recreates_passes_in_order() {
    let (mut scheduler, mut recorder) = scheduler_with_probes(2);
    scheduler.draw_frame(&mut recorder).unwrap();
    scheduler
        .backend_mut()
        .presents
        .push_back(PresentOutcome::Suboptimal);
    recorder.log.borrow_mut().clear();

    assert_eq!(
        scheduler.draw_frame(&mut recorder).unwrap(),
        FrameStatus::Recreated
    );

    let log = recorder.log.borrow().clone();
    let present = log.iter().position(|e| e == "present 1").unwrap();
    assert_eq!(
        log[present + 1..],
        [
            "wait_idle",
            "recreate_surface",
            "recreate shadow",
            "recreate environment",
            "recreate depth_prepass",
            "recreate gbuffer",
            "recreate lighting",
            "recreate tone_mapping",
        ]
    );
    assert_eq!(scheduler.frame_counter(), 2, "the frame was still presented");
}

#[test]
fn test_resize_reaches_every_pass_attachment() {
    let log = new_log();
    let backend = ScriptedBackend::new(2, log.clone());
    let (pipeline, attachments) = deferred_probes();
    let mut recorder = ProbeRecorder::ready(pipeline, log, surface(backend.window_extent));
    let mut scheduler = FrameScheduler::new(backend);

    assert!(attachments.iter().all(|a| a.get() == extent(800, 600)));

    scheduler.backend_mut().window_extent = extent(1024, 300);
    scheduler.mark_framebuffer_resized();
    assert_eq!(
        scheduler.draw_frame(&mut recorder).unwrap(),
        FrameStatus::Recreated
    );

    assert_eq!(recorder.surface.extent, extent(1024, 300));
    for attachment in &attachments {
        assert_eq!(attachment.get(), recorder.surface.extent);
    }
    assert_eq!(
        scheduler.draw_frame(&mut recorder).unwrap(),
        FrameStatus::Presented,
        "the resize flag is consumed by one recreation"
    );
}

#[test]
fn test_failing_pass_leaves_slot_idle_without_submit() {
    let log = new_log();
    let backend = ScriptedBackend::new(2, log.clone());
    let mut pipeline = deferred_renderer::PassPipeline::new();
    pipeline.push(ProbePass::new("depth_prepass")).push(ProbePass {
        fail_execute: true,
        ..ProbePass::new("lighting")
    });
    let mut recorder = ProbeRecorder::ready(pipeline, log, surface(backend.window_extent));
    let mut scheduler = FrameScheduler::new(backend);
    recorder.log.borrow_mut().clear();

    let err = scheduler.draw_frame(&mut recorder).unwrap_err();
    assert!(!err.is_fatal());
    assert_eq!(scheduler.slot_state(0), Some(SlotState::Idle));
    assert_eq!(scheduler.frame_counter(), 0);
    assert!(entries(&recorder.log, "submit").is_empty());
    assert!(entries(&recorder.log, "present").is_empty());
}

#[test]
fn test_failed_recording_rebuilds_surface_before_next_acquire() {
    let log = new_log();
    let backend = ScriptedBackend::new(1, log.clone());
    let mut pipeline = deferred_renderer::PassPipeline::new();
    pipeline.push(ProbePass {
        fail_execute: true,
        ..ProbePass::new("lighting")
    });
    let mut recorder = ProbeRecorder::ready(pipeline, log, surface(backend.window_extent));
    let mut scheduler = FrameScheduler::new(backend);
    recorder.log.borrow_mut().clear();

    assert!(scheduler.draw_frame(&mut recorder).is_err());
    assert!(scheduler.is_recreate_pending());
    assert!(scheduler.draw_frame(&mut recorder).is_err());

    assert_eq!(
        *recorder.log.borrow(),
        vec![
            "wait 0",
            "acquire 0",
            "begin 0",
            "wait 0",
            "wait_idle",
            "recreate_surface",
            "recreate lighting",
            "acquire 0",
            "begin 0",
        ],
        "the abandoned acquire is never followed by another acquire on the same surface"
    );
}
