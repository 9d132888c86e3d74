//! Feedback delay with a damped feedback path

use super::MonoNode;
use crate::model::track::DelayParams;

/// Longest supported delay time in seconds
pub const MAX_DELAY_SECS: f32 = 2.0;

#[derive(Debug, Clone)]
pub struct FeedbackDelay {
    buffer: Vec<f32>,
    write_pos: usize,
    delay_samples: usize,
    feedback: f32,
    wet: f32,
    /// One-pole low-pass coefficient on the feedback path
    damp: f32,
    filter_state: f32,
}

impl FeedbackDelay {
    pub fn new(params: &DelayParams, sample_rate: u32) -> Self {
        let sr = sample_rate as f32;
        let time = params.time.clamp(0.001, MAX_DELAY_SECS);
        let delay_samples = ((time * sr).round() as usize).max(1);
        let cutoff = params.lowpass.clamp(20.0, sr / 2.0);
        Self {
            buffer: vec![0.0; delay_samples + 1],
            write_pos: 0,
            delay_samples,
            feedback: params.feedback.clamp(0.0, 0.95),
            wet: params.wet_mix.clamp(0.0, 1.0),
            damp: (-2.0 * std::f32::consts::PI * cutoff / sr).exp(),
            filter_state: 0.0,
        }
    }
}

impl MonoNode for FeedbackDelay {
    fn process(&mut self, block: &mut [f32]) {
        if self.wet <= 0.0 {
            return;
        }
        let len = self.buffer.len();
        for sample in block.iter_mut() {
            let read_pos = (self.write_pos + len - self.delay_samples) % len;
            let delayed = self.buffer[read_pos];

            self.filter_state = delayed * (1.0 - self.damp) + self.filter_state * self.damp;
            self.buffer[self.write_pos] = *sample + self.filter_state * self.feedback;
            self.write_pos = (self.write_pos + 1) % len;

            *sample = *sample * (1.0 - self.wet) + delayed * self.wet;
        }
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.filter_state = 0.0;
        self.write_pos = 0;
    }

    fn name(&self) -> &'static str {
        "delay"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_impulse_repeats_after_delay_time() {
        let params = DelayParams {
            wet_mix: 1.0,
            time: 0.01,
            feedback: 0.0,
            lowpass: 20000.0,
        };
        let mut delay = FeedbackDelay::new(&params, 1000);
        let mut block = vec![0.0; 30];
        block[0] = 1.0;
        delay.process(&mut block);

        assert_eq!(block[0], 0.0);
        assert_eq!(block[10], 1.0);
        assert_eq!(block[20], 0.0);
    }

    #[test]
    fn test_dry_when_wet_is_zero() {
        let params = DelayParams {
            wet_mix: 0.0,
            time: 0.25,
            feedback: 0.5,
            lowpass: 8000.0,
        };
        let mut block = vec![0.5; 8];
        FeedbackDelay::new(&params, 48000).process(&mut block);
        assert_eq!(block, vec![0.5; 8]);
    }
}
