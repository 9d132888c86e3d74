//! Stereo-linked peak limiter on the main bus

use super::StereoNode;
use crate::engine::buffer::{db_to_linear, linear_to_db};

/// Main-bus ceiling in dBFS
pub const DEFAULT_CEILING_DB: f32 = -1.0;
const ATTACK_MS: f32 = 0.1;
const RELEASE_MS: f32 = 100.0;

/// Envelope coefficient for a time constant
#[inline]
fn time_to_coeff(time_ms: f32, sample_rate: f32) -> f32 {
    (-1.0 / (time_ms * sample_rate / 1000.0)).exp()
}

#[derive(Debug, Clone)]
pub struct PeakLimiter {
    ceiling_db: f32,
    ceiling: f32,
    attack: f32,
    release: f32,
    /// Gain reduction in dB
    envelope: f32,
}

impl PeakLimiter {
    pub fn new(ceiling_db: f32, sample_rate: u32) -> Self {
        let sr = sample_rate as f32;
        Self {
            ceiling_db,
            ceiling: db_to_linear(ceiling_db),
            attack: time_to_coeff(ATTACK_MS, sr),
            release: time_to_coeff(RELEASE_MS, sr),
            envelope: 0.0,
        }
    }
}

impl StereoNode for PeakLimiter {
    fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let level = l.abs().max(r.abs());
            let target = if level > self.ceiling {
                linear_to_db(level) - self.ceiling_db
            } else {
                0.0
            };

            let coeff = if target > self.envelope { self.attack } else { self.release };
            self.envelope = coeff * self.envelope + (1.0 - coeff) * target;

            // Brickwall: never let the smoothed envelope undershoot the peak
            let reduction = self.envelope.max(target);
            let gain = db_to_linear(-reduction);
            *l *= gain;
            *r *= gain;
        }
    }

    fn reset(&mut self) {
        self.envelope = 0.0;
    }
}
