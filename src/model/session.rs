//! Session: the single mutable root of a recording project
//!
//! All edits replace sub-fields of the session. Every edit enforces the
//! session length limit and the region invariants; move, trim, split and
//! duplicate additionally refuse to create overlapping regions on a track.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::region::{Region, RegionId, TIME_EPSILON};
use super::track::{Track, TrackFx};
use crate::error::{FourtrackError, Result};

/// Number of tape tracks in every session
pub const TRACK_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSignature {
    pub beats_per_bar: u8,
    pub beat_unit: u8,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            beats_per_bar: 4,
            beat_unit: 4,
        }
    }
}

/// Which edge of a region a trim moves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimEdge {
    Front,
    Back,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bpm: Option<f64>,
    #[serde(default)]
    pub time_signature: TimeSignature,
    pub tracks: [Track; TRACK_COUNT],
    /// Hard ceiling on the timeline length in seconds
    pub max_duration: f64,
}

impl Session {
    pub fn new(name: impl Into<String>, max_duration: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: Utc::now(),
            bpm: None,
            time_signature: TimeSignature::default(),
            tracks: [Track::new(1), Track::new(2), Track::new(3), Track::new(4)],
            max_duration,
        }
    }

    pub fn track(&self, index: usize) -> Result<&Track> {
        self.tracks
            .get(index)
            .ok_or(FourtrackError::TrackOutOfRange { index })
    }

    pub fn track_mut(&mut self, index: usize) -> Result<&mut Track> {
        self.tracks
            .get_mut(index)
            .ok_or(FourtrackError::TrackOutOfRange { index })
    }

    /// Does any track hold at least one region?
    pub fn has_regions(&self) -> bool {
        self.tracks.iter().any(Track::has_audio)
    }

    /// Does any track other than `index` hold audio?
    ///
    /// This decides whether a new take is an overdub.
    pub fn other_tracks_have_audio(&self, index: usize) -> bool {
        self.tracks
            .iter()
            .enumerate()
            .any(|(i, t)| i != index && t.has_audio())
    }

    /// Timeline end of the last region in the session
    pub fn end_time(&self) -> f64 {
        self.tracks.iter().map(Track::end_time).fold(0.0, f64::max)
    }

    /// Index of the armed track, if any
    pub fn armed_track(&self) -> Option<usize> {
        self.tracks.iter().position(|t| t.is_armed)
    }

    /// Find a region anywhere in the session
    pub fn find_region(&self, id: RegionId) -> Option<(usize, &Region)> {
        self.tracks
            .iter()
            .enumerate()
            .find_map(|(i, t)| t.region(id).map(|r| (i, r)))
    }

    // ========================================================================
    // Edit Operations
    // ========================================================================

    /// Add a region to a track
    pub fn add_region(&mut self, track: usize, region: Region) -> Result<RegionId> {
        self.check_placement(track, &region, None)?;
        let id = region.id;
        self.track_mut(track)?.regions.push(region);
        Ok(id)
    }

    /// Append a freshly recorded take
    ///
    /// Takes are placed where the performer played them, so only the length
    /// limit applies: the tail past `max_duration` is cut off.
    pub fn append_recorded_region(&mut self, track: usize, mut region: Region) -> Result<RegionId> {
        if region.start_time >= self.max_duration {
            return Err(FourtrackError::ExceedsMaxDuration {
                end_secs: region.end_time(),
                max_secs: self.max_duration,
            });
        }
        if region.end_time() > self.max_duration {
            region.duration = self.max_duration - region.start_time;
        }
        region.validate()?;
        let id = region.id;
        self.track_mut(track)?.regions.push(region);
        Ok(id)
    }

    /// Move a region to a new timeline position
    pub fn move_region(&mut self, track: usize, id: RegionId, new_start: f64) -> Result<()> {
        let mut moved = self.region_copy(track, id)?;
        moved.start_time = new_start;
        self.check_placement(track, &moved, Some(id))?;
        self.replace_region(track, moved)
    }

    /// Move one edge of a region, adjusting the source window to match
    pub fn trim_region(&mut self, track: usize, id: RegionId, edge: TrimEdge, at: f64) -> Result<()> {
        let original = self.region_copy(track, id)?;
        let mut trimmed = original.clone();

        match edge {
            TrimEdge::Front => {
                let delta = at - original.start_time;
                trimmed.start_time = at;
                trimmed.duration = original.duration - delta;
                if !original.reversed {
                    trimmed.file_start_offset = original.file_start_offset + delta;
                }
            }
            TrimEdge::Back => {
                let delta = original.end_time() - at;
                trimmed.duration = original.duration - delta;
                if original.reversed {
                    trimmed.file_start_offset = original.file_start_offset + delta;
                }
            }
        }

        self.check_placement(track, &trimmed, Some(id))?;
        self.replace_region(track, trimmed)
    }

    /// Split a region in two at timeline position `at`
    ///
    /// Returns the ids of the left and right halves. The left half keeps the
    /// original id.
    pub fn split_region(&mut self, track: usize, id: RegionId, at: f64) -> Result<(RegionId, RegionId)> {
        let original = self.region_copy(track, id)?;
        if at <= original.start_time + TIME_EPSILON || at >= original.end_time() - TIME_EPSILON {
            return Err(FourtrackError::InvalidRegion {
                reason: format!("split point {:.3}s is outside the region", at),
            });
        }

        let mut left = original.clone();
        left.duration = at - original.start_time;
        left.fade_out = None;

        let mut right = original.duplicated_at(at);
        right.duration = original.end_time() - at;
        right.fade_in = None;

        if original.reversed {
            left.file_start_offset = original.file_start_offset + right.duration;
        } else {
            right.file_start_offset = original.file_start_offset + left.duration;
        }

        left.validate()?;
        right.validate()?;
        let right_id = right.id;
        self.replace_region(track, left)?;
        self.track_mut(track)?.regions.push(right);
        Ok((id, right_id))
    }

    /// Place a copy of a region at `at` on the same track
    pub fn duplicate_region(&mut self, track: usize, id: RegionId, at: f64) -> Result<RegionId> {
        let copy = self.region_copy(track, id)?.duplicated_at(at);
        self.add_region(track, copy)
    }

    pub fn delete_region(&mut self, track: usize, id: RegionId) -> Result<Region> {
        let regions = &mut self.track_mut(track)?.regions;
        let index = regions
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| FourtrackError::RegionNotFound {
                region: id.to_string(),
            })?;
        Ok(regions.remove(index))
    }

    pub fn set_track_fx(&mut self, track: usize, fx: TrackFx) -> Result<()> {
        self.track_mut(track)?.fx = fx;
        Ok(())
    }

    pub fn set_track_muted(&mut self, track: usize, muted: bool) -> Result<()> {
        self.track_mut(track)?.is_muted = muted;
        Ok(())
    }

    /// Arm exactly one track for recording, or disarm all with `None`
    pub fn arm_track(&mut self, track: Option<usize>) -> Result<()> {
        if let Some(index) = track {
            self.track(index)?;
        }
        for (i, t) in self.tracks.iter_mut().enumerate() {
            t.is_armed = Some(i) == track;
        }
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn region_copy(&self, track: usize, id: RegionId) -> Result<Region> {
        self.track(track)?
            .region(id)
            .cloned()
            .ok_or_else(|| FourtrackError::RegionNotFound {
                region: id.to_string(),
            })
    }

    fn replace_region(&mut self, track: usize, region: Region) -> Result<()> {
        let slot = self
            .track_mut(track)?
            .region_mut(region.id)
            .ok_or_else(|| FourtrackError::RegionNotFound {
                region: region.id.to_string(),
            })?;
        *slot = region;
        Ok(())
    }

    fn check_placement(&self, track: usize, region: &Region, ignore: Option<RegionId>) -> Result<()> {
        region.validate()?;
        if region.end_time() > self.max_duration + TIME_EPSILON {
            return Err(FourtrackError::ExceedsMaxDuration {
                end_secs: region.end_time(),
                max_secs: self.max_duration,
            });
        }
        if let Some(other) = self.track(track)?.overlapping(region, ignore) {
            return Err(FourtrackError::RegionOverlap {
                track,
                other: other.id.to_string(),
            });
        }
        Ok(())
    }
}
