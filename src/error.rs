//! Error handling for fourtrack
//!
//! Errors fall into five families: setup failures that abort an operation
//! before it starts, resource exhaustion, per-item failures that are logged
//! and skipped, environment interruptions, and user cancellation.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for fourtrack operations
pub type Result<T> = std::result::Result<T, FourtrackError>;

/// Main error type for fourtrack operations
#[derive(Error, Debug)]
pub enum FourtrackError {
    // Setup Errors
    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Audio engine setup failed: {reason}")]
    EngineSetup { reason: String },

    #[error("Effects graph setup failed on track {track}: {reason}")]
    GraphSetup { track: usize, reason: String },

    #[error("Engine handle is stale (engine was rebuilt)")]
    StaleEngineHandle,

    #[error("Output device is not running")]
    DeviceNotRunning,

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // Resource Errors
    #[error("Insufficient storage space: {available_bytes} bytes available, {required_bytes} required")]
    InsufficientSpace {
        available_bytes: u64,
        required_bytes: u64,
    },

    // Per-item Errors
    #[error("Audio source unavailable: {handle}")]
    SourceUnavailable {
        handle: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Invalid audio: {reason}")]
    InvalidAudio { reason: String },

    #[error("Pre-render failed for region {region}: {reason}")]
    PrerenderFailed { region: String, reason: String },

    // Model Errors
    #[error("Invalid region: {reason}")]
    InvalidRegion { reason: String },

    #[error("Region not found: {region}")]
    RegionNotFound { region: String },

    #[error("Region would overlap region {other} on track {track}")]
    RegionOverlap { track: usize, other: String },

    #[error("Edit ends at {end_secs:.3}s, past the session limit of {max_secs:.1}s")]
    ExceedsMaxDuration { end_secs: f64, max_secs: f64 },

    #[error("Track index {index} out of range")]
    TrackOutOfRange { index: usize },

    #[error("Structural edits are refused while recording")]
    RecordingActive,

    #[error("Invalid state: expected {expected}, was {actual}")]
    InvalidState {
        expected: &'static str,
        actual: String,
    },

    // Environment Errors
    #[error("Interrupted: {reason}")]
    Interrupted { reason: String },

    // Bounce Errors
    #[error("Session has no regions to bounce")]
    EmptySession,

    #[error("Render failed at frame {frame}: {reason}")]
    RenderFailed { frame: u64, reason: String },

    #[error("Failed to write {path}: {reason}")]
    WriteFailed { path: PathBuf, reason: String },

    #[error("Output file failed verification: {reason}")]
    OutputVerification { reason: String },

    #[error("Bounce cancelled")]
    BounceCancelled,

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FourtrackError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            FourtrackError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            FourtrackError::EngineSetup { .. } => "ENGINE_SETUP",
            FourtrackError::GraphSetup { .. } => "GRAPH_SETUP",
            FourtrackError::StaleEngineHandle => "STALE_ENGINE_HANDLE",
            FourtrackError::DeviceNotRunning => "DEVICE_NOT_RUNNING",
            FourtrackError::InvalidConfig { .. } => "INVALID_CONFIG",
            FourtrackError::InsufficientSpace { .. } => "INSUFFICIENT_SPACE",
            FourtrackError::SourceUnavailable { .. } => "SOURCE_UNAVAILABLE",
            FourtrackError::InvalidAudio { .. } => "INVALID_AUDIO",
            FourtrackError::PrerenderFailed { .. } => "PRERENDER_FAILED",
            FourtrackError::InvalidRegion { .. } => "INVALID_REGION",
            FourtrackError::RegionNotFound { .. } => "REGION_NOT_FOUND",
            FourtrackError::RegionOverlap { .. } => "REGION_OVERLAP",
            FourtrackError::ExceedsMaxDuration { .. } => "EXCEEDS_MAX_DURATION",
            FourtrackError::TrackOutOfRange { .. } => "TRACK_OUT_OF_RANGE",
            FourtrackError::RecordingActive => "RECORDING_ACTIVE",
            FourtrackError::InvalidState { .. } => "INVALID_STATE",
            FourtrackError::Interrupted { .. } => "INTERRUPTED",
            FourtrackError::EmptySession => "EMPTY_SESSION",
            FourtrackError::RenderFailed { .. } => "RENDER_FAILED",
            FourtrackError::WriteFailed { .. } => "WRITE_FAILED",
            FourtrackError::OutputVerification { .. } => "OUTPUT_VERIFICATION",
            FourtrackError::BounceCancelled => "BOUNCE_CANCELLED",
            FourtrackError::Io(_) => "IO_ERROR",
            FourtrackError::Wav(_) => "WAV_ERROR",
            FourtrackError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if this error only affects a single item and the surrounding
    /// operation may continue
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FourtrackError::SourceUnavailable { .. }
                | FourtrackError::InvalidAudio { .. }
                | FourtrackError::PrerenderFailed { .. }
                | FourtrackError::RegionOverlap { .. }
                | FourtrackError::ExceedsMaxDuration { .. }
                | FourtrackError::BounceCancelled
        )
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            FourtrackError::InsufficientSpace { .. } => vec![
                "Free up storage space",
                "Delete unused takes or old bounces",
            ],
            FourtrackError::SourceUnavailable { .. } => vec![
                "Check that the take file still exists",
                "The region will be silent until the source is restored",
            ],
            FourtrackError::EmptySession => vec!["Record or import at least one region first"],
            FourtrackError::RegionOverlap { .. } => vec![
                "Move the region to a free spot on the track",
                "Trim the neighbouring region first",
            ],
            FourtrackError::ExceedsMaxDuration { .. } => {
                vec!["Shorten the region or move it earlier"]
            }
            FourtrackError::RecordingActive => vec!["Stop recording before editing regions"],
            FourtrackError::StaleEngineHandle | FourtrackError::DeviceNotRunning => {
                vec!["Restart playback after the audio device is available again"]
            }
            FourtrackError::WriteFailed { .. } | FourtrackError::OutputVerification { .. } => {
                vec!["Check storage space and permissions, then bounce again"]
            }
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = FourtrackError::InsufficientSpace {
            available_bytes: 10,
            required_bytes: 100,
        };
        assert_eq!(err.error_code(), "INSUFFICIENT_SPACE");
        assert!(!err.is_recoverable());
        assert!(!err.recovery_suggestions().is_empty());
    }

    #[test]
    fn test_per_item_errors_are_recoverable() {
        let err = FourtrackError::PrerenderFailed {
            region: "r1".to_string(),
            reason: "missing".to_string(),
        };
        assert!(err.is_recoverable());
        assert!(!FourtrackError::EmptySession.is_recoverable());
    }
}
