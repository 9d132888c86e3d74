//! Offline bounce
//!
//! Renders the whole timeline to one 16-bit stereo WAV faster than real
//! time. The bounce builds its own copy of every track's effect chain, runs
//! the same pre-render step as live playback and then pulls fixed-size
//! blocks through the graph, reporting progress and checking for
//! cancellation once per block.

mod render;

pub use render::OfflineRender;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hound::{WavReader, WavWriter};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::engine::clock::secs_to_frames;
use crate::engine::io::{float_to_i16, SampleEncoding};
use crate::engine::prerender::RegionPrerenderer;
use crate::engine::source::SourceResolver;
use crate::error::{FourtrackError, Result};
use crate::fx::NodeFactory;
use crate::model::Session;

/// Bounce output is always stereo
pub const BOUNCE_CHANNELS: u16 = 2;

/// Progress after each rendered block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BounceProgress {
    pub percentage: f64,
    pub frames_processed: u64,
    pub total_frames: u64,
}

/// Cooperative cancellation flag, checked at block boundaries
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Descriptor of a finished bounce
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mix {
    pub name: String,
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Length in seconds
    pub duration: f64,
    pub file: PathBuf,
}

pub struct Bouncer {
    resolver: Arc<dyn SourceResolver>,
    factory: Arc<dyn NodeFactory>,
    sample_rate: u32,
    block_frames: usize,
}

impl Bouncer {
    pub fn new(config: &EngineConfig, resolver: Arc<dyn SourceResolver>, factory: Arc<dyn NodeFactory>) -> Self {
        Self {
            resolver,
            factory,
            sample_rate: config.sample_rate,
            block_frames: config.bounce_block_frames.max(1),
        }
    }

    /// Render `session` to `output`
    ///
    /// # Arguments
    /// * `session` - Snapshot to render
    /// * `name` - Name recorded in the returned [`Mix`]
    /// * `output` - Destination WAV path; removed again on cancel or failure
    /// * `cancel` - Checked once per block
    /// * `progress` - Called after every block
    pub fn bounce(
        &self,
        session: &Session,
        name: &str,
        output: &Path,
        cancel: &CancelToken,
        mut progress: impl FnMut(BounceProgress),
    ) -> Result<Mix> {
        // Rejected before any graph is built
        if !session.has_regions() {
            return Err(FourtrackError::EmptySession);
        }

        let mut render = OfflineRender::build(session, self.factory.as_ref(), self.sample_rate)?;
        let cache = RegionPrerenderer::new(Arc::clone(&self.resolver)).render_session(session, self.sample_rate);
        render.attach(cache);

        let end = session.end_time().min(session.max_duration);
        let total_frames = secs_to_frames(end, self.sample_rate).max(0) as u64;
        info!(
            session = %session.id,
            total_frames,
            sample_rate = self.sample_rate,
            output = %output.display(),
            "bounce started"
        );

        match self.render_to_file(&mut render, output, total_frames, cancel, &mut progress) {
            Ok(()) => {}
            Err(e) => {
                if let Err(rm) = fs::remove_file(output) {
                    debug!(error = %rm, "no partial bounce file to remove");
                }
                if matches!(e, FourtrackError::BounceCancelled) {
                    info!("bounce cancelled; partial output removed");
                } else {
                    warn!(error = %e, "bounce failed");
                }
                return Err(e);
            }
        }

        verify_output(output, total_frames)?;
        let mix = Mix {
            name: name.to_string(),
            session_id: session.id,
            created_at: Utc::now(),
            duration: total_frames as f64 / self.sample_rate as f64,
            file: output.to_path_buf(),
        };
        info!(duration = mix.duration, "bounce complete");
        Ok(mix)
    }

    fn render_to_file(
        &self,
        render: &mut OfflineRender,
        output: &Path,
        total_frames: u64,
        cancel: &CancelToken,
        progress: &mut impl FnMut(BounceProgress),
    ) -> Result<()> {
        let write_error = |e: hound::Error| FourtrackError::WriteFailed {
            path: output.to_path_buf(),
            reason: e.to_string(),
        };

        let spec = SampleEncoding::Pcm16.spec(BOUNCE_CHANNELS, self.sample_rate);
        let mut writer = WavWriter::create(output, spec).map_err(write_error)?;
        let mut left = vec![0.0_f32; self.block_frames];
        let mut right = vec![0.0_f32; self.block_frames];

        let mut position = 0u64;
        while position < total_frames {
            if cancel.is_cancelled() {
                return Err(FourtrackError::BounceCancelled);
            }

            let frames = (total_frames - position).min(self.block_frames as u64) as usize;
            render.render_block(position, &mut left[..frames], &mut right[..frames])?;

            for (l, r) in left[..frames].iter().zip(&right[..frames]) {
                writer.write_sample(float_to_i16(*l)).map_err(write_error)?;
                writer.write_sample(float_to_i16(*r)).map_err(write_error)?;
            }

            position += frames as u64;
            progress(BounceProgress {
                percentage: position as f64 / total_frames as f64 * 100.0,
                frames_processed: position,
                total_frames,
            });
        }

        writer.finalize().map_err(write_error)?;
        Ok(())
    }
}

/// The output must be non-empty, re-openable and the expected length
fn verify_output(path: &Path, total_frames: u64) -> Result<()> {
    let size = fs::metadata(path)
        .map_err(|e| FourtrackError::OutputVerification {
            reason: e.to_string(),
        })?
        .len();
    if size == 0 {
        return Err(FourtrackError::OutputVerification {
            reason: "output file is empty".to_string(),
        });
    }

    let reader = WavReader::open(path).map_err(|e| FourtrackError::OutputVerification {
        reason: format!("output cannot be reopened: {}", e),
    })?;
    let spec = reader.spec();
    if spec.channels != BOUNCE_CHANNELS || reader.duration() as u64 != total_frames {
        return Err(FourtrackError::OutputVerification {
            reason: format!(
                "expected {} stereo frames, found {} frames in {} channels",
                total_frames,
                reader.duration(),
                spec.channels
            ),
        });
    }
    Ok(())
}
