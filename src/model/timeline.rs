//! Runtime-only transport position and loop settings (never persisted)

use super::region::RegionId;

/// Loop boundaries in timeline seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopRange {
    pub start: f64,
    pub end: f64,
}

impl LoopRange {
    pub fn length(&self) -> f64 {
        self.end - self.start
    }

    pub fn is_valid(&self) -> bool {
        self.start >= 0.0 && self.end > self.start
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimelineState {
    /// Current playhead in seconds
    pub playhead: f64,
    pub is_playing: bool,
    pub is_recording: bool,
    pub is_loop_mode: bool,
    pub loop_start: f64,
    pub loop_end: f64,
    /// Selected region as (track index, region id)
    pub selected_region: Option<(usize, RegionId)>,
}

impl TimelineState {
    /// Is the playhead advancing?
    pub fn is_running(&self) -> bool {
        self.is_playing || self.is_recording
    }

    /// Active loop range, if loop mode is on and the range is usable
    pub fn active_loop(&self) -> Option<LoopRange> {
        let range = LoopRange {
            start: self.loop_start,
            end: self.loop_end,
        };
        (self.is_loop_mode && range.is_valid()).then_some(range)
    }

    /// Move the playhead, clamped to `[0, max]`
    pub fn seek(&mut self, position: f64, max: f64) {
        self.playhead = position.clamp(0.0, max.max(0.0));
    }
}
