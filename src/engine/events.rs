//! Typed engine events
//!
//! Real-time and worker code never raise errors; they report through this
//! channel and the coordinating context performs the stop, cleanup or alert.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::model::RegionId;

/// Environment interruption delivered by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interruption {
    /// The active input or output device went away
    DeviceDisconnected,
    /// OS-level interruption such as an incoming call
    System { reason: String },
}

impl std::fmt::Display for Interruption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interruption::DeviceDisconnected => write!(f, "audio device disconnected"),
            Interruption::System { reason } => write!(f, "{}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Background writer found the volume below the free-space floor
    DiskSpaceExhausted { available_bytes: u64 },
    /// The capture queue was full and buffers were dropped
    CaptureOverrun { dropped_buffers: u64 },
    /// The take writer failed; capture continues but audio is lost
    TakeWriteFailed { message: String },
    RecordingStopped {
        track: usize,
        region: Option<RegionId>,
        start_time: f64,
        trimmed_secs: f64,
    },
    PlaybackStopped { playhead: f64 },
    LoopWrapped { loop_start: f64 },
    /// User-visible notice (interruptions, emergency stops)
    Notice { message: String },
}

/// Create an event channel
pub fn event_channel() -> (Sender<EngineEvent>, Receiver<EngineEvent>) {
    unbounded()
}
