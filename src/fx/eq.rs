//! Four-band peaking EQ

use std::f64::consts::PI;

use super::MonoNode;
use crate::model::track::{EqBand, EQ_BAND_COUNT};

/// Normalized biquad coefficients (a0 = 1)
#[derive(Debug, Clone, Copy, Default)]
struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl BiquadCoeffs {
    /// Peaking EQ from the Audio EQ Cookbook
    fn peaking(sample_rate: f64, frequency: f64, gain_db: f64, q: f64) -> Self {
        // Keep the centre below Nyquist
        let freq = frequency.clamp(20.0, sample_rate / 2.0 - 1.0);
        let q = q.clamp(0.1, 10.0);

        let w0 = 2.0 * PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);
        let a = 10.0_f64.powf(gain_db / 40.0);

        let a0 = 1.0 + alpha / a;
        Self {
            b0: (1.0 + alpha * a) / a0,
            b1: (-2.0 * cos_w0) / a0,
            b2: (1.0 - alpha * a) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha / a) / a0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl BiquadState {
    fn process(&mut self, input: f64, c: &BiquadCoeffs) -> f64 {
        let output = c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }
}

/// Cascade of the track's non-flat bands
#[derive(Debug, Clone)]
pub struct TrackEq {
    bands: Vec<(BiquadCoeffs, BiquadState)>,
}

impl TrackEq {
    pub fn new(bands: &[EqBand; EQ_BAND_COUNT], sample_rate: u32) -> Self {
        let bands = bands
            .iter()
            .filter(|b| !b.is_flat())
            .map(|b| {
                let coeffs = BiquadCoeffs::peaking(
                    sample_rate as f64,
                    b.frequency as f64,
                    b.gain_db as f64,
                    b.q as f64,
                );
                (coeffs, BiquadState::default())
            })
            .collect();
        Self { bands }
    }

    pub fn is_bypassed(&self) -> bool {
        self.bands.is_empty()
    }
}

impl MonoNode for TrackEq {
    fn process(&mut self, block: &mut [f32]) {
        if self.bands.is_empty() {
            return;
        }
        for sample in block.iter_mut() {
            let mut x = *sample as f64;
            for (coeffs, state) in &mut self.bands {
                x = state.process(x, coeffs);
            }
            *sample = x as f32;
        }
    }

    fn reset(&mut self) {
        for (_, state) in &mut self.bands {
            *state = BiquadState::default();
        }
    }

    fn name(&self) -> &'static str {
        "eq"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::rms;
    use crate::engine::io::generate_test_tone;

    fn bands_with(gain_db: f32) -> [EqBand; EQ_BAND_COUNT] {
        let mut bands = [EqBand::new(100.0), EqBand::new(1000.0), EqBand::new(4000.0), EqBand::new(9000.0)];
        bands[1].gain_db = gain_db;
        bands[1].q = 1.0;
        bands
    }

    #[test]
    fn test_flat_bands_are_bypassed() {
        let mut eq = TrackEq::new(&bands_with(0.0), 48000);
        assert!(eq.is_bypassed());
        let mut block = vec![0.3, -0.2, 0.1];
        eq.process(&mut block);
        assert_eq!(block, vec![0.3, -0.2, 0.1]);
    }

    #[test]
    fn test_boost_at_center_frequency() {
        let tone = generate_test_tone(1000.0, 0.5, 48000).into_mono();
        let mut boosted = tone.clone();
        TrackEq::new(&bands_with(6.0), 48000).process(&mut boosted);

        // Skip the filter's settling time
        let ratio = rms(&boosted[4800..]) / rms(&tone[4800..]);
        assert!((ratio - 2.0).abs() < 0.1, "ratio was {}", ratio);
    }
}
