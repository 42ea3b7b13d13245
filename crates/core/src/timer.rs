//! Frame timing.

use std::time::{Duration, Instant};

/// Weight of the newest sample in the smoothed frame time.
const SMOOTHING: f32 = 0.1;

/// Measures per-frame deltas and keeps a smoothed frames-per-second estimate.
///
/// # Example
///
/// ```
/// use deferred_core::FrameTimer;
///
/// let mut timer = FrameTimer::new();
/// let dt = timer.tick();
/// assert!(dt >= 0.0);
/// ```
#[derive(Debug)]
pub struct FrameTimer {
    start: Instant,
    last_tick: Instant,
    smoothed_frame_time: Option<f32>,
    frames: u64,
}

impl FrameTimer {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            smoothed_frame_time: None,
            frames: 0,
        }
    }

    /// Time since creation.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed().as_secs_f32()
    }

    /// Marks the end of a frame and returns its duration in seconds.
    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let delta = (now - self.last_tick).as_secs_f32();
        self.last_tick = now;
        self.record(delta);
        delta
    }

    fn record(&mut self, delta: f32) {
        self.frames += 1;
        self.smoothed_frame_time = Some(match self.smoothed_frame_time {
            Some(avg) => avg + (delta - avg) * SMOOTHING,
            None => delta,
        });
    }

    /// Number of ticks recorded.
    #[inline]
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Smoothed frames per second, or `None` before the first non-zero frame.
    pub fn fps(&self) -> Option<f32> {
        self.smoothed_frame_time
            .filter(|t| *t > f32::EPSILON)
            .map(|t| 1.0 / t)
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_unknown_before_first_frame() {
        let timer = FrameTimer::new();
        assert!(timer.fps().is_none());
        assert_eq!(timer.frame_count(), 0);
    }

    #[test]
    fn test_smoothed_fps_converges() {
        let mut timer = FrameTimer::new();
        for _ in 0..200 {
            timer.record(1.0 / 60.0);
        }
        let fps = timer.fps().unwrap();
        assert!((fps - 60.0).abs() < 0.5, "fps was {fps}");
        assert_eq!(timer.frame_count(), 200);
    }

    #[test]
    fn test_reset_clears_samples() {
        let mut timer = FrameTimer::new();
        timer.record(0.02);
        timer.reset();
        assert!(timer.fps().is_none());
    }
}
