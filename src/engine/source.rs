//! Source audio access
//!
//! A region's `SourceHandle` is resolved to an [`AudioSource`] by the
//! file-storage collaborator. Sources read absolute frame ranges; the
//! region's `file_start_offset` is applied by the pre-renderer and nowhere
//! else.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use hound::WavReader;

use crate::engine::buffer::AudioBuffer;
use crate::engine::io::read_interleaved;
use crate::error::{FourtrackError, Result};
use crate::model::SourceHandle;

/// Readable PCM source with a known native format
pub trait AudioSource: Send {
    /// Native sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Native channel count
    fn channels(&self) -> u16;

    /// Total length in frames
    fn total_frames(&self) -> u64;

    /// Read up to `count` frames starting at absolute frame `offset`
    ///
    /// Reads past the end return fewer frames; they never fail.
    fn read_frames(&mut self, offset: u64, count: usize) -> Result<AudioBuffer>;
}

/// Resolves handles to open sources
pub trait SourceResolver: Send + Sync {
    fn open(&self, handle: &SourceHandle) -> Result<Box<dyn AudioSource>>;
}

/// WAV file on disk
pub struct WavFileSource {
    reader: WavReader<BufReader<File>>,
    sample_rate: u32,
    channels: u16,
    total_frames: u64,
}

impl WavFileSource {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = WavReader::open(path)?;
        let spec = reader.spec();
        if spec.channels == 0 {
            return Err(FourtrackError::UnsupportedFormat {
                format: "zero-channel WAV".to_string(),
            });
        }
        Ok(Self {
            total_frames: reader.duration() as u64,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            reader,
        })
    }
}

impl AudioSource for WavFileSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn total_frames(&self) -> u64 {
        self.total_frames
    }

    fn read_frames(&mut self, offset: u64, count: usize) -> Result<AudioBuffer> {
        let channels = self.channels as usize;
        let offset = offset.min(self.total_frames);
        let available = (self.total_frames - offset).min(count as u64) as usize;

        self.reader.seek(offset as u32)?;
        let interleaved = read_interleaved(&mut self.reader, available * channels)?;
        AudioBuffer::from_interleaved(&interleaved, channels, self.sample_rate)
    }
}

/// Resolves handles as file names relative to a directory
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    root: PathBuf,
}

impl DirectoryResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, handle: &SourceHandle) -> PathBuf {
        self.root.join(handle.as_str())
    }
}

impl SourceResolver for DirectoryResolver {
    fn open(&self, handle: &SourceHandle) -> Result<Box<dyn AudioSource>> {
        let path = self.path_for(handle);
        let source = WavFileSource::open(&path).map_err(|e| FourtrackError::SourceUnavailable {
            handle: handle.to_string(),
            source: Some(Box::new(e)),
        })?;
        Ok(Box::new(source))
    }
}
