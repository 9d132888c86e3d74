//! Tracks and their per-track effect parameters

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::region::{Region, RegionId};

/// Number of EQ bands on every track
pub const EQ_BAND_COUNT: usize = 4;

/// One peaking EQ band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EqBand {
    /// Center frequency in Hz
    pub frequency: f32,
    /// Boost/cut in dB
    pub gain_db: f32,
    /// Bandwidth (Q)
    pub q: f32,
}

impl EqBand {
    pub fn new(frequency: f32) -> Self {
        Self {
            frequency,
            gain_db: 0.0,
            q: 0.7,
        }
    }

    /// A band with no gain leaves the signal untouched
    #[inline]
    pub fn is_flat(&self) -> bool {
        self.gain_db.abs() < 0.01
    }
}

/// Reverb room size preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoomSize {
    #[default]
    Small,
    Large,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReverbParams {
    /// Wet/dry balance, 0..=1
    pub wet_mix: f32,
    pub room: RoomSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayParams {
    /// Wet/dry balance, 0..=1
    pub wet_mix: f32,
    /// Delay time in seconds
    pub time: f32,
    /// Feedback amount, 0..0.95
    pub feedback: f32,
    /// Low-pass cutoff on the feedback path in Hz
    pub lowpass: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaturationParams {
    /// Wet/dry balance, 0..=1
    pub wet_mix: f32,
    /// Drive into the waveshaper in dB
    pub pre_gain: f32,
}

/// Effect parameters of one track
///
/// Pure data; replaced as a whole when the user changes a setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackFx {
    #[serde(rename = "volumeDB")]
    pub volume_db: f32,
    /// -1 (left) ..= 1 (right)
    pub pan: f32,
    pub eq_bands: [EqBand; EQ_BAND_COUNT],
    pub reverb: ReverbParams,
    pub delay: DelayParams,
    pub saturation: SaturationParams,
}

impl Default for TrackFx {
    fn default() -> Self {
        Self {
            volume_db: 0.0,
            pan: 0.0,
            eq_bands: [
                EqBand::new(100.0),
                EqBand::new(500.0),
                EqBand::new(2000.0),
                EqBand::new(8000.0),
            ],
            reverb: ReverbParams {
                wet_mix: 0.0,
                room: RoomSize::Small,
            },
            delay: DelayParams {
                wet_mix: 0.0,
                time: 0.25,
                feedback: 0.3,
                lowpass: 8000.0,
            },
            saturation: SaturationParams {
                wet_mix: 0.0,
                pre_gain: 0.0,
            },
        }
    }
}

/// One of the four tape tracks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: Uuid,
    /// 1-based track number shown to the user
    pub number: u8,
    /// Regions in insertion order, not time order
    #[serde(default)]
    pub regions: Vec<Region>,
    #[serde(default)]
    pub fx: TrackFx,
    #[serde(default)]
    pub is_armed: bool,
    #[serde(default)]
    pub is_muted: bool,
}

impl Track {
    pub fn new(number: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            number,
            regions: Vec::new(),
            fx: TrackFx::default(),
            is_armed: false,
            is_muted: false,
        }
    }

    pub fn has_audio(&self) -> bool {
        !self.regions.is_empty()
    }

    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.iter().find(|r| r.id == id)
    }

    pub fn region_mut(&mut self, id: RegionId) -> Option<&mut Region> {
        self.regions.iter_mut().find(|r| r.id == id)
    }

    /// First region (other than `ignore`) that would overlap `candidate`
    pub fn overlapping(&self, candidate: &Region, ignore: Option<RegionId>) -> Option<&Region> {
        self.regions
            .iter()
            .filter(|r| Some(r.id) != ignore && r.id != candidate.id)
            .find(|r| r.overlaps(candidate))
    }

    /// Regions sounding inside `[start, end)`, ordered by start time
    pub fn regions_in(&self, start: f64, end: f64) -> Vec<&Region> {
        let mut hits: Vec<&Region> = self
            .regions
            .iter()
            .filter(|r| r.intersects(start, end))
            .collect();
        hits.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        hits
    }

    /// Timeline end of the last region on this track
    pub fn end_time(&self) -> f64 {
        self.regions
            .iter()
            .map(Region::end_time)
            .fold(0.0, f64::max)
    }
}
