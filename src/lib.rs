//! Fourtrack - four-track tape recorder core
//!
//! Records, overdubs and bounces audio regions on four parallel tracks
//! while a playhead advances in real time.
//!
//! # Architecture
//!
//! Data flows one way at the top and one way at the bottom:
//! - Session edits → region pre-renderer → playback scheduler → output device
//! - Input device → recorder → session edits
//!
//! The bouncer consumes the same session and pre-render step offline and
//! writes a single 16-bit stereo WAV.

pub mod bounce;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod fx;
pub mod model;

pub use error::{FourtrackError, Result};
