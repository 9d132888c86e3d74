//! Audio Buffer Management
//!
//! Non-interleaved 32-bit float buffers plus the level helpers shared by the
//! pre-renderer, the recorder's meter and the bouncer.

use crate::error::{FourtrackError, Result};

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert decibels to linear amplitude
///
/// # Arguments
/// * `db` - Value in decibels
///
/// # Returns
/// Linear amplitude (0.0 to 1.0+ range)
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert linear amplitude to decibels
///
/// Returns -f32::INFINITY for zero input.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}

/// Peak absolute sample value (linear)
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0_f32, f32::max)
}

/// Root-mean-square level (linear)
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

// ============================================================================
// Audio Buffer
// ============================================================================

/// Core audio buffer type
///
/// Stores audio as non-interleaved 32-bit floating point samples.
/// Each channel is a separate `Vec<f32>`.
///
/// # Example
/// ```
/// use fourtrack::engine::AudioBuffer;
///
/// let buffer = AudioBuffer::silent(2, 48000, 48000);
/// assert_eq!(buffer.channels(), 2);
/// assert_eq!(buffer.len(), 48000);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Sample data: outer Vec is channels, inner Vec is samples
    pub samples: Vec<Vec<f32>>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Create a zeroed buffer
    pub fn silent(channels: usize, frames: usize, sample_rate: u32) -> Self {
        Self {
            samples: vec![vec![0.0_f32; frames]; channels],
            sample_rate,
        }
    }

    /// Wrap a single mono channel
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: vec![samples],
            sample_rate,
        }
    }

    /// Create an audio buffer from interleaved sample data
    ///
    /// # Arguments
    /// * `interleaved` - Interleaved sample data (L, R, L, R, ... for stereo)
    /// * `channels` - Number of interleaved channels
    /// * `sample_rate` - Sample rate in Hz
    pub fn from_interleaved(interleaved: &[f32], channels: usize, sample_rate: u32) -> Result<Self> {
        if channels == 0 {
            return Err(FourtrackError::InvalidAudio {
                reason: "channel count must be positive".to_string(),
            });
        }
        if interleaved.len() % channels != 0 {
            return Err(FourtrackError::InvalidAudio {
                reason: format!(
                    "Interleaved data length {} is not divisible by channel count {}",
                    interleaved.len(),
                    channels
                ),
            });
        }

        let frames = interleaved.len() / channels;
        let mut samples = vec![Vec::with_capacity(frames); channels];
        for frame in interleaved.chunks_exact(channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                samples[ch].push(sample);
            }
        }

        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Convert the buffer to interleaved format
    pub fn to_interleaved(&self) -> Vec<f32> {
        let frames = self.len();
        let mut interleaved = Vec::with_capacity(self.channels() * frames);
        for i in 0..frames {
            for channel in &self.samples {
                interleaved.push(channel[i]);
            }
        }
        interleaved
    }

    /// Get the number of channels
    #[inline]
    pub fn channels(&self) -> usize {
        self.samples.len()
    }

    /// Get the number of samples per channel
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.first().map(|ch| ch.len()).unwrap_or(0)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the duration in seconds
    #[inline]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.len() as f64 / self.sample_rate as f64
    }

    /// Get an immutable reference to a channel's samples
    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.samples[index]
    }

    /// Get a mutable reference to a channel's samples
    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.samples[index]
    }

    /// Fold all channels into one, preserving energy
    ///
    /// The channel sum is scaled by `1/sqrt(n)`, so uncorrelated channels
    /// keep their combined power. A mono buffer is returned unchanged.
    pub fn into_mono(self) -> Vec<f32> {
        let channels = self.channels();
        let mut iter = self.samples.into_iter();
        let Some(mut mono) = iter.next() else {
            return Vec::new();
        };
        if channels == 1 {
            return mono;
        }
        for channel in iter {
            for (acc, s) in mono.iter_mut().zip(channel) {
                *acc += s;
            }
        }
        let scale = 1.0 / (channels as f32).sqrt();
        for s in &mut mono {
            *s *= scale;
        }
        mono
    }
}
