//! CLI Command Implementations

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::bounce::{Bouncer, CancelToken, Mix};
use crate::config::EngineConfig;
use crate::engine::buffer::AudioBuffer;
use crate::engine::io::{write_wav, SampleEncoding};
use crate::engine::prerender::RegionPrerenderer;
use crate::engine::source::DirectoryResolver;
use crate::error::{FourtrackError, Result};
use crate::fx::StockNodes;
use crate::model::{JsonFilePersister, RegionId, Session};

/// Load the engine configuration, or defaults when none is given
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path),
        None => Ok(EngineConfig::default()),
    }
}

/// Bounce a saved session
pub fn bounce(config: &EngineConfig, session: &Path, sources: &Path, out: &Path, name: Option<&str>) -> Result<Mix> {
    let session = JsonFilePersister::load(session)?;
    let name = name.unwrap_or(session.name.as_str()).to_string();
    info!(session = %session.name, output = %out.display(), "bouncing");

    let bouncer = Bouncer::new(config, Arc::new(DirectoryResolver::new(sources)), Arc::new(StockNodes));
    let mix = bouncer.bounce(&session, &name, out, &CancelToken::new(), |progress| {
        eprint!(
            "\rBouncing: {:5.1}% ({}/{} frames)",
            progress.percentage, progress.frames_processed, progress.total_frames
        );
        let _ = std::io::stderr().flush();
    })?;
    eprintln!();

    println!("Bounced '{}' to {}", mix.name, mix.file.display());
    println!("Duration: {:.3}s", mix.duration);
    Ok(mix)
}

/// Print a human-readable summary of a session
pub fn inspect(session: &Path) -> Result<()> {
    let session = JsonFilePersister::load(session)?;
    print!("{}", describe(&session));
    Ok(())
}

fn describe(session: &Session) -> String {
    let mut out = String::new();
    out.push_str(&format!("Session: {} ({})\n", session.name, session.id));
    out.push_str(&format!("Created: {}\n", session.created_at.to_rfc3339()));
    if let Some(bpm) = session.bpm {
        out.push_str(&format!(
            "Tempo: {} bpm, {}/{}\n",
            bpm, session.time_signature.beats_per_bar, session.time_signature.beat_unit
        ));
    }
    out.push_str(&format!(
        "Length: {:.3}s of {:.1}s max\n",
        session.end_time(),
        session.max_duration
    ));

    for track in &session.tracks {
        let mut flags = Vec::new();
        if track.is_armed {
            flags.push("armed");
        }
        if track.is_muted {
            flags.push("muted");
        }
        out.push_str(&format!(
            "\nTrack {}{}: {} region(s), {:+.1} dB, pan {:+.2}\n",
            track.number,
            if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            },
            track.regions.len(),
            track.fx.volume_db,
            track.fx.pan
        ));
        for region in track.regions_in(0.0, f64::INFINITY) {
            out.push_str(&format!(
                "  {} {:>9.3}s +{:.3}s  {}{}\n",
                region.id,
                region.start_time,
                region.duration,
                region.source,
                if region.reversed { " (reversed)" } else { "" }
            ));
        }
    }
    out
}

/// Pre-render a single region to a 32-bit float mono WAV
pub fn prerender(
    config: &EngineConfig,
    session: &Path,
    sources: &Path,
    track: usize,
    region: RegionId,
    out: &Path,
) -> Result<()> {
    let session = JsonFilePersister::load(session)?;
    let found = session
        .track(track)?
        .region(region)
        .ok_or_else(|| FourtrackError::RegionNotFound {
            region: region.to_string(),
        })?;

    let prerenderer = RegionPrerenderer::new(Arc::new(DirectoryResolver::new(sources)));
    let samples = prerenderer.render_region(found, config.sample_rate)?;
    let frames = samples.len();
    write_wav(&AudioBuffer::mono(samples, config.sample_rate), out, SampleEncoding::Float32)?;

    println!(
        "Region {} on track {}: {} frames at {} Hz written to {}",
        region,
        track,
        frames,
        config.sample_rate,
        out.display()
    );
    Ok(())
}
