//! Regions: placed, trimmed instances of a source clip on a track

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FourtrackError, Result};

/// Half a sample at 192kHz; positions closer than this are the same instant
pub const TIME_EPSILON: f64 = 1.0 / 384_000.0;

/// Stable identifier of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(pub Uuid);

impl RegionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RegionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque reference to source audio, resolved by the file-storage collaborator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceHandle(pub String);

impl SourceHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A placed clip on a track timeline
///
/// `start_time` and `duration` place the region on the timeline.
/// `file_start_offset` and `file_duration` describe the window read from the
/// source. All values are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub id: RegionId,
    pub source: SourceHandle,
    pub start_time: f64,
    pub duration: f64,
    #[serde(default)]
    pub file_start_offset: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_duration: Option<f64>,
    #[serde(default)]
    pub reversed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fade_in: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fade_out: Option<f64>,
    #[serde(default, rename = "gainDB", skip_serializing_if = "Option::is_none")]
    pub gain_db: Option<f32>,
}

impl Region {
    /// Create a region playing `duration` seconds of `source` from its start
    pub fn new(source: SourceHandle, start_time: f64, duration: f64) -> Self {
        Self {
            id: RegionId::new(),
            source,
            start_time,
            duration,
            file_start_offset: 0.0,
            file_duration: None,
            reversed: false,
            fade_in: None,
            fade_out: None,
            gain_db: None,
        }
    }

    /// Timeline position where the region stops sounding
    #[inline]
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// Check the placement and source-window invariants
    pub fn validate(&self) -> Result<()> {
        if !(self.duration > 0.0) || !self.duration.is_finite() {
            return Err(FourtrackError::InvalidRegion {
                reason: format!("duration must be positive, got {}", self.duration),
            });
        }
        if self.start_time < 0.0 || self.file_start_offset < 0.0 {
            return Err(FourtrackError::InvalidRegion {
                reason: "start time and file offset must not be negative".to_string(),
            });
        }
        if let Some(file_duration) = self.file_duration {
            if self.file_start_offset + self.duration > file_duration + TIME_EPSILON {
                return Err(FourtrackError::InvalidRegion {
                    reason: format!(
                        "window {:.3}s+{:.3}s exceeds source length {:.3}s",
                        self.file_start_offset, self.duration, file_duration
                    ),
                });
            }
        }
        Ok(())
    }

    /// Does the region sound anywhere inside `[start, end)`?
    #[inline]
    pub fn intersects(&self, start: f64, end: f64) -> bool {
        self.start_time < end && self.end_time() > start
    }

    /// Does this region share any timeline time with `other`?
    pub fn overlaps(&self, other: &Region) -> bool {
        self.start_time < other.end_time() - TIME_EPSILON
            && other.start_time < self.end_time() - TIME_EPSILON
    }

    /// Copy of this region with a fresh id placed at `start_time`
    pub fn duplicated_at(&self, start_time: f64) -> Self {
        Self {
            id: RegionId::new(),
            start_time,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(start: f64, duration: f64) -> Region {
        Region::new(SourceHandle::new("take.wav"), start, duration)
    }

    #[test]
    fn test_validate_rejects_zero_duration() {
        assert!(region(0.0, 0.0).validate().is_err());
        assert!(region(0.0, 1.0).validate().is_ok());
    }

    #[test]
    fn test_validate_source_window() {
        let mut r = region(0.0, 2.0);
        r.file_start_offset = 1.0;
        r.file_duration = Some(2.5);
        assert!(r.validate().is_err());
        r.file_duration = Some(3.0);
        assert!(r.validate().is_ok());
    }

    #[test]
    fn test_adjacent_regions_do_not_overlap() {
        let a = region(0.0, 1.0);
        let b = region(1.0, 1.0);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&region(0.5, 1.0)));
    }

    #[test]
    fn test_serializes_camel_case() {
        let mut r = region(1.5, 2.0);
        r.gain_db = Some(-3.0);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["startTime"], 1.5);
        assert_eq!(json["gainDB"], -3.0);
        assert!(json.get("fadeIn").is_none());
    }
}
