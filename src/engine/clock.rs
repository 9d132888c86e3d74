//! Clock Anchor
//!
//! Maps hardware sample time and wall-clock time to timeline position. One
//! anchor is captured when playback actually starts and again on every loop
//! wrap; every schedule time is derived from it.

use std::time::Instant;

/// Source of wall-clock time in seconds
pub trait WallClock: Send + Sync {
    fn now_secs(&self) -> f64;
}

/// Monotonic wall clock measured from construction
#[derive(Debug, Clone, Copy)]
pub struct SystemWallClock {
    origin: Instant,
}

impl SystemWallClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemWallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl WallClock for SystemWallClock {
    fn now_secs(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Convert seconds to a frame count at the given rate, rounding to nearest
#[inline]
pub fn secs_to_frames(secs: f64, sample_rate: u32) -> i64 {
    (secs * sample_rate as f64).round() as i64
}

/// Fixed correspondence between sample time, wall time and playhead
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockAnchor {
    /// Hardware sample counter at the anchor instant (S0)
    pub sample_time: i64,
    /// Wall-clock seconds at the anchor instant (T0)
    pub wall_time: f64,
    /// Timeline position in seconds at the anchor instant (P0)
    pub playhead: f64,
    pub sample_rate: u32,
}

impl ClockAnchor {
    /// Anchor to a device that is already producing audio
    ///
    /// # Arguments
    /// * `sample_time` - Device sample counter read after start
    /// * `wall_time` - Wall clock read at the same moment
    /// * `playhead` - Timeline position playback started from
    /// * `sample_rate` - Device sample rate
    pub fn new(sample_time: i64, wall_time: f64, playhead: f64, sample_rate: u32) -> Self {
        Self {
            sample_time,
            wall_time,
            playhead,
            sample_rate,
        }
    }

    /// Timeline position at the given wall time
    pub fn timeline_now(&self, wall_now: f64) -> f64 {
        self.playhead + (wall_now - self.wall_time).max(0.0)
    }

    /// Hardware sample time at which timeline position `t` sounds
    ///
    /// Works in whole frames so two positions that are an exact number of
    /// frames apart always map to sample times the same distance apart.
    pub fn sample_time_for(&self, t: f64) -> i64 {
        self.sample_time + secs_to_frames(t, self.sample_rate) - secs_to_frames(self.playhead, self.sample_rate)
    }

    /// New anchor for a loop wrap
    ///
    /// The sample time is pushed forward by `margin_frames` so the anchor
    /// never refers to a sample the device has already played.
    pub fn rewound(&self, loop_start: f64, wall_now: f64, device_sample_time: i64, margin_frames: i64) -> Self {
        Self {
            sample_time: device_sample_time + margin_frames,
            wall_time: wall_now,
            playhead: loop_start,
            sample_rate: self.sample_rate,
        }
    }
}
