//! Playback Scheduler
//!
//! Each pass computes a lookahead window of timeline time, slices the
//! not-yet-scheduled part of every intersecting region out of the
//! pre-render cache and queues it on the track's player. A per-track
//! high-water mark keeps repeated passes idempotent, and slices that follow
//! one another on the timeline are chained sample-contiguously so scheduling
//! jitter never opens a gap or an overlap.

use tracing::debug;

use crate::config::EngineConfig;
use crate::engine::clock::{secs_to_frames, ClockAnchor};
use crate::engine::device::{Engine, EngineHandle};
use crate::engine::prerender::{BufferSlice, PrerenderCache};
use crate::error::Result;
use crate::model::region::TIME_EPSILON;
use crate::model::{RegionId, Session, TimelineState, TRACK_COUNT};

/// Per-track player state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerState {
    /// Nothing queued
    #[default]
    Idle,
    /// Buffers queued, first one not yet reached by the hardware
    Scheduled,
    /// Hardware is inside queued audio
    Playing,
}

/// One slice handed to a track player
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSlice {
    pub track: usize,
    pub region: RegionId,
    pub timeline_start: f64,
    pub timeline_end: f64,
    pub sample_time: i64,
    pub frames: usize,
}

impl ScheduledSlice {
    pub fn end_sample(&self) -> i64 {
        self.sample_time + self.frames as i64
    }
}

/// What one scheduling pass did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    pub window_start: f64,
    pub window_end: f64,
    pub slices: Vec<ScheduledSlice>,
    /// In-window regions with no pre-rendered buffer
    pub missing_buffers: usize,
}

impl PassReport {
    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn frames_scheduled(&self) -> usize {
        self.slices.iter().map(|s| s.frames).sum()
    }
}

/// Where the last slice on a track ended, on the timeline and in samples
#[derive(Debug, Clone, Copy, PartialEq)]
struct ChainPoint {
    timeline_end: f64,
    sample_end: i64,
}

#[derive(Debug, Clone, Default)]
struct TrackCursor {
    high_water: f64,
    chain: Option<ChainPoint>,
    state: PlayerState,
    first_sample: Option<i64>,
    end_sample: Option<i64>,
}

impl TrackCursor {
    fn reset(&mut self, from: f64) {
        *self = TrackCursor {
            high_water: from,
            ..TrackCursor::default()
        };
    }
}

pub struct PlaybackScheduler {
    cursors: [TrackCursor; TRACK_COUNT],
    lookahead: f64,
    lead_secs: f64,
    excluded: Option<usize>,
    /// Bumped on every reset; passes captured earlier are stale
    generation: u64,
}

impl PlaybackScheduler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            cursors: Default::default(),
            lookahead: config.lookahead_secs,
            lead_secs: config.schedule_lead_secs,
            excluded: None,
            generation: 0,
        }
    }

    /// Forget everything scheduled and start again from `from`
    ///
    /// Called at playback start and on every re-anchor.
    pub fn reset(&mut self, from: f64) {
        for cursor in &mut self.cursors {
            cursor.reset(from);
        }
        self.generation = self.generation.wrapping_add(1);
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Keep a track (the one being recorded) out of scheduling entirely
    pub fn exclude_track(&mut self, track: Option<usize>) {
        self.excluded = track;
    }

    /// Lift a track's exclusion and schedule it again from `from`
    ///
    /// The track's queue was cleared when it was excluded, so its cursor
    /// starts over instead of resuming at the old high-water mark.
    pub fn readmit_track(&mut self, track: usize, from: f64) {
        if self.excluded == Some(track) {
            self.excluded = None;
        }
        if let Some(cursor) = self.cursors.get_mut(track) {
            cursor.reset(from);
        }
    }

    pub fn excluded_track(&self) -> Option<usize> {
        self.excluded
    }

    pub fn high_water(&self, track: usize) -> f64 {
        self.cursors.get(track).map(|c| c.high_water).unwrap_or(0.0)
    }

    pub fn player_state(&self, track: usize) -> PlayerState {
        self.cursors.get(track).map(|c| c.state).unwrap_or_default()
    }

    /// Lookahead window for the current transport position
    ///
    /// Loop mode covers the rest of the loop from where this anchor started;
    /// otherwise the window runs `lookahead` seconds past the playhead. Both
    /// are capped at the session length.
    pub fn window(&self, timeline: &TimelineState, anchor: &ClockAnchor, max_duration: f64) -> (f64, f64) {
        let (start, end) = match timeline.active_loop() {
            Some(range) => (range.start.max(anchor.playhead), range.end),
            None => (timeline.playhead, timeline.playhead + self.lookahead),
        };
        (start, end.min(max_duration))
    }

    /// Run one scheduling pass
    ///
    /// # Arguments
    /// * `engine` / `handle` - Output device to queue slices on
    /// * `session` - Snapshot the cache was rendered from
    /// * `cache` - Pre-rendered region buffers
    /// * `anchor` - Current clock anchor
    /// * `timeline` - Transport state (playhead, loop settings)
    pub fn pass(
        &mut self,
        engine: &mut Engine,
        handle: EngineHandle,
        session: &Session,
        cache: &PrerenderCache,
        anchor: &ClockAnchor,
        timeline: &TimelineState,
    ) -> Result<PassReport> {
        let output = engine.output(handle)?;
        let (window_start, window_end) = self.window(timeline, anchor, session.max_duration);
        let sample_rate = cache.sample_rate();
        let lead_frames = secs_to_frames(self.lead_secs, sample_rate);
        let mut report = PassReport {
            window_start,
            window_end,
            ..PassReport::default()
        };

        for (index, track) in session.tracks.iter().enumerate() {
            if self.excluded == Some(index) || track.is_muted {
                continue;
            }
            let cursor = &mut self.cursors[index];
            let from = window_start.max(cursor.high_water);
            if from >= window_end - TIME_EPSILON {
                continue;
            }

            for region in track.regions_in(from, window_end) {
                let seg_start = region.start_time.max(from);
                let seg_end = region.end_time().min(window_end);
                if seg_end - seg_start <= TIME_EPSILON {
                    continue;
                }

                let Some(buffer) = cache.get(index, region.id) else {
                    // Pre-render failed earlier: nothing to play here
                    report.missing_buffers += 1;
                    cursor.high_water = seg_end;
                    continue;
                };

                let offset = secs_to_frames(seg_start - region.start_time, sample_rate).max(0) as usize;
                let end = (secs_to_frames(seg_end - region.start_time, sample_rate).max(0) as usize)
                    .min(buffer.len());
                if end <= offset {
                    cursor.high_water = seg_end;
                    continue;
                }
                let frames = end - offset;

                let sample_time = match cursor.chain {
                    Some(chain) if (seg_start - chain.timeline_end).abs() < TIME_EPSILON => chain.sample_end,
                    _ => anchor.sample_time_for(seg_start) + lead_frames,
                };

                output.schedule(index, BufferSlice::new(buffer.clone(), offset, frames), sample_time)?;

                cursor.chain = Some(ChainPoint {
                    timeline_end: seg_end,
                    sample_end: sample_time + frames as i64,
                });
                cursor.high_water = seg_end;
                cursor.first_sample.get_or_insert(sample_time);
                cursor.end_sample = Some(sample_time + frames as i64);
                if cursor.state == PlayerState::Idle {
                    cursor.state = PlayerState::Scheduled;
                }

                report.slices.push(ScheduledSlice {
                    track: index,
                    region: region.id,
                    timeline_start: seg_start,
                    timeline_end: seg_end,
                    sample_time,
                    frames,
                });
            }

            // Nothing else in this window needs this track
            cursor.high_water = cursor.high_water.max(window_end);
        }

        debug!(
            window_start,
            window_end,
            slices = report.slices.len(),
            frames = report.frames_scheduled(),
            missing = report.missing_buffers,
            "scheduling pass"
        );
        Ok(report)
    }

    /// Advance player states against the hardware sample counter
    pub fn refresh_states(&mut self, device_sample_time: i64) {
        for cursor in &mut self.cursors {
            match cursor.state {
                PlayerState::Scheduled if cursor.first_sample.is_some_and(|s| device_sample_time >= s) => {
                    cursor.state = PlayerState::Playing;
                }
                PlayerState::Playing if cursor.end_sample.is_some_and(|e| device_sample_time >= e) => {
                    cursor.state = PlayerState::Idle;
                }
                _ => {}
            }
        }
    }
}
