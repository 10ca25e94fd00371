//! Frame scheduling.
//!
//! The host calls back once per display frame at its own rate. Simulation
//! work runs at a target fps: a callback is skipped unless more than
//! `1000 / fps` ms passed since the last executed frame, and the remainder is
//! carried so the cadence does not drift.

use std::time::Duration;

/// Anything advanced once per executed frame.
///
/// `time` is the host's wall clock in milliseconds, `delta` the seconds since
/// the previous executed frame.
pub trait Update {
    fn update(&mut self, time: f64, delta: f32);
}

/// Throttles host frame callbacks to a target rate.
#[derive(Debug, Clone)]
pub struct FrameLimiter {
    interval_ms: f64,
    last_render: f64,
    last_frame: f64,
}

impl FrameLimiter {
    pub fn new(fps: u32, start_ms: f64) -> Self {
        Self {
            interval_ms: 1000.0 / f64::from(fps.max(1)),
            last_render: start_ms,
            last_frame: start_ms,
        }
    }

    /// Returns the frame delta in seconds if a frame should run at `now_ms`.
    pub fn poll(&mut self, now_ms: f64) -> Option<f32> {
        let elapsed = now_ms - self.last_render;
        if elapsed <= self.interval_ms {
            return None;
        }
        let delta = ((now_ms - self.last_frame) / 1000.0) as f32;
        self.last_frame = now_ms;
        self.last_render = now_ms - (elapsed % self.interval_ms);
        Some(delta)
    }
}

/// Lets an action through at most once per interval of host time.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval_ms: f64,
    last: Option<f64>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: interval.as_secs_f64() * 1000.0,
            last: None,
        }
    }

    pub fn ready(&mut self, now_ms: f64) -> bool {
        match self.last {
            Some(last) if now_ms - last < self.interval_ms => false,
            _ => {
                self.last = Some(now_ms);
                true
            }
        }
    }
}
