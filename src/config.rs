//! Engine configuration
//!
//! All timing constants of the scheduler, recorder and bouncer live here so
//! hosts can tune them from a JSON file without recompiling.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FourtrackError, Result};

/// Default working sample rate (48kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Default free-space floor for recording (200 MiB)
const DEFAULT_MIN_FREE_BYTES: u64 = 200 * 1024 * 1024;

/// Tunable engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Working sample rate in Hz
    pub sample_rate: u32,
    /// Length of the lookahead window in seconds
    pub lookahead_secs: f64,
    /// Fixed lead added to anchor-derived schedule times
    pub schedule_lead_secs: f64,
    /// Interval between periodic scheduling passes
    pub reschedule_interval_secs: f64,
    /// Run periodic and loop-wrap passes on short-lived threads
    pub background_passes: bool,
    /// Recording refuses to start below this many free bytes
    pub min_free_bytes: u64,
    /// Seconds of captured audio between free-space re-checks
    pub space_check_interval_secs: f64,
    /// Depth of the capture queue between the input callback and the writer
    pub capture_queue_depth: usize,
    /// Frames rendered per offline bounce block
    pub bounce_block_frames: usize,
    /// Default session length limit in seconds
    pub max_session_secs: f64,
    /// Minimum quiet time before a session change is persisted
    pub persist_debounce_secs: f64,
    /// Directory where recorded takes are written
    pub takes_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            lookahead_secs: 20.0,
            schedule_lead_secs: 0.05,
            reschedule_interval_secs: 1.0,
            background_passes: true,
            min_free_bytes: DEFAULT_MIN_FREE_BYTES,
            space_check_interval_secs: 5.0,
            capture_queue_depth: 256,
            bounce_block_frames: 4096,
            max_session_secs: 480.0,
            persist_debounce_secs: 1.0,
            takes_dir: PathBuf::from("takes"),
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a JSON file
    ///
    /// Missing fields fall back to their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every setting is usable
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(FourtrackError::InvalidConfig {
                reason: reason.to_string(),
            })
        };

        if self.sample_rate == 0 {
            return invalid("sample_rate must be positive");
        }
        if self.lookahead_secs <= 0.0 {
            return invalid("lookahead_secs must be positive");
        }
        if self.schedule_lead_secs < 0.0 {
            return invalid("schedule_lead_secs must not be negative");
        }
        if self.reschedule_interval_secs <= 0.0 {
            return invalid("reschedule_interval_secs must be positive");
        }
        if self.reschedule_interval_secs >= self.lookahead_secs {
            return invalid("reschedule_interval_secs must be shorter than the lookahead");
        }
        if self.space_check_interval_secs <= 0.0 {
            return invalid("space_check_interval_secs must be positive");
        }
        if self.capture_queue_depth == 0 || self.bounce_block_frames == 0 {
            return invalid("queue depth and block size must be positive");
        }
        if self.max_session_secs <= 0.0 {
            return invalid("max_session_secs must be positive");
        }
        Ok(())
    }
}
