// src/present/fps.rs

use std::time::{Duration, Instant};

/// Frames-per-second over fixed measurement windows.
///
/// The first tick only opens a window. Each later tick counts one presented
/// frame; once a window is at least `interval` long the rate is returned and
/// a new window starts.
#[derive(Debug, Clone)]
pub struct FrameRateCounter {
    interval: Duration,
    window_start: Option<Instant>,
    frames: u32,
    last: Option<f64>,
}

impl FrameRateCounter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            window_start: None,
            frames: 0,
            last: None,
        }
    }

    pub fn tick(&mut self, now: Instant) -> Option<f64> {
        let start = match self.window_start {
            Some(start) => start,
            None => {
                self.window_start = Some(now);
                return None;
            }
        };
        self.frames += 1;
        let elapsed = now.saturating_duration_since(start);
        if elapsed < self.interval || elapsed.is_zero() {
            return None;
        }
        let fps = f64::from(self.frames) / elapsed.as_secs_f64();
        self.frames = 0;
        self.window_start = Some(now);
        self.last = Some(fps);
        Some(fps)
    }

    /// Most recently reported rate.
    pub fn last(&self) -> Option<f64> {
        self.last
    }
}
