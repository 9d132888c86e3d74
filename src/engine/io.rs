//! Audio file I/O
//!
//! WAV decoding to 32-bit float, WAV encoding for takes and bounces, and the
//! linear resampler used when a source's rate differs from the working rate.

use std::io::Read;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::engine::buffer::AudioBuffer;
use crate::error::{FourtrackError, Result};

/// Sample encoding for files written by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    /// 16-bit signed integer PCM (bounce output)
    Pcm16,
    /// 32-bit IEEE float (recorded takes)
    Float32,
}

impl SampleEncoding {
    pub fn spec(&self, channels: u16, sample_rate: u32) -> WavSpec {
        match self {
            SampleEncoding::Pcm16 => WavSpec {
                channels,
                sample_rate,
                bits_per_sample: 16,
                sample_format: SampleFormat::Int,
            },
            SampleEncoding::Float32 => WavSpec {
                channels,
                sample_rate,
                bits_per_sample: 32,
                sample_format: SampleFormat::Float,
            },
        }
    }
}

/// Convert a float sample to 16-bit PCM with clipping
#[inline]
pub fn float_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).round().clamp(-32768.0, 32767.0) as i16
}

/// Read a whole WAV file into memory
pub fn read_wav(path: &Path) -> Result<AudioBuffer> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    let total = reader.len() as usize;
    let interleaved = read_interleaved(&mut reader, total)?;
    AudioBuffer::from_interleaved(&interleaved, spec.channels as usize, spec.sample_rate)
}

/// Write a buffer to a WAV file with the given encoding
pub fn write_wav(buffer: &AudioBuffer, path: &Path, encoding: SampleEncoding) -> Result<()> {
    let spec = encoding.spec(buffer.channels() as u16, buffer.sample_rate);
    let mut writer = WavWriter::create(path, spec)?;
    for sample in buffer.to_interleaved() {
        match encoding {
            SampleEncoding::Pcm16 => writer.write_sample(float_to_i16(sample))?,
            SampleEncoding::Float32 => writer.write_sample(sample)?,
        }
    }
    writer.finalize()?;
    Ok(())
}

/// Read up to `count` interleaved samples from the reader's current position
/// and convert them to f32
pub(crate) fn read_interleaved<R: Read>(reader: &mut WavReader<R>, count: usize) -> Result<Vec<f32>> {
    let spec = reader.spec();
    let samples = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .take(count)
            .collect::<std::result::Result<Vec<f32>, _>>()?,
        (SampleFormat::Int, 8) => reader
            .samples::<i8>()
            .take(count)
            .map(|s| s.map(|v| v as f32 / 128.0))
            .collect::<std::result::Result<Vec<f32>, _>>()?,
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .take(count)
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<std::result::Result<Vec<f32>, _>>()?,
        // 24-bit stored as i32 in hound
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .take(count)
            .map(|s| s.map(|v| v as f32 / 8388608.0))
            .collect::<std::result::Result<Vec<f32>, _>>()?,
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .take(count)
            .map(|s| s.map(|v| v as f32 / 2147483648.0))
            .collect::<std::result::Result<Vec<f32>, _>>()?,
        (format, bits) => {
            return Err(FourtrackError::UnsupportedFormat {
                format: format!("{}-bit {:?} audio", bits, format),
            })
        }
    };
    Ok(samples)
}

/// Linear interpolation resampling
///
/// Output length is `ceil(len * target / source)`.
pub fn resample_linear(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if samples.is_empty() || source_rate == target_rate || source_rate == 0 {
        return samples.to_vec();
    }

    let ratio = target_rate as f64 / source_rate as f64;
    let source_len = samples.len();
    let target_len = (source_len as u64 * target_rate as u64).div_ceil(source_rate as u64) as usize;
    let mut output = Vec::with_capacity(target_len);

    for i in 0..target_len {
        // Map output index to source position
        let src_pos = i as f64 / ratio;
        let src_idx = src_pos.floor() as usize;
        let frac = (src_pos - src_idx as f64) as f32;

        let sample = if src_idx + 1 < source_len {
            samples[src_idx] * (1.0 - frac) + samples[src_idx + 1] * frac
        } else {
            samples[source_len - 1]
        };
        output.push(sample);
    }

    output
}

/// Generate a mono sine test tone
pub fn generate_test_tone(frequency: f32, duration_secs: f32, sample_rate: u32) -> AudioBuffer {
    let num_samples = (duration_secs * sample_rate as f32) as usize;
    let angular_freq = 2.0 * std::f32::consts::PI * frequency / sample_rate as f32;
    let samples = (0..num_samples)
        .map(|i| (angular_freq * i as f32).sin())
        .collect();
    AudioBuffer::mono(samples, sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_pcm16_roundtrip_within_quantization() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let tone = generate_test_tone(440.0, 0.1, 48000);

        write_wav(&tone, &path, SampleEncoding::Pcm16).unwrap();
        let back = read_wav(&path).unwrap();

        assert_eq!(back.len(), tone.len());
        assert_eq!(back.sample_rate, 48000);
        for (a, b) in tone.channel(0).iter().zip(back.channel(0)) {
            assert!((a - b).abs() < 1.0 / 16000.0);
        }
    }

    #[test]
    fn test_float_roundtrip_is_exact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("take.wav");
        let buffer = AudioBuffer::mono(vec![0.1, -0.2, 0.3], 44100);

        write_wav(&buffer, &path, SampleEncoding::Float32).unwrap();
        assert_eq!(read_wav(&path).unwrap(), buffer);
    }

    #[test]
    fn test_resample_length() {
        let input = vec![0.0; 441];
        assert_eq!(resample_linear(&input, 44100, 48000).len(), 480);
        assert_eq!(resample_linear(&input, 48000, 48000), input);
    }

    #[test]
    fn test_float_to_i16_clips() {
        assert_eq!(float_to_i16(2.0), 32767);
        assert_eq!(float_to_i16(-2.0), -32768);
        assert_eq!(float_to_i16(0.0), 0);
    }
}
