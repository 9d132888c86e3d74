//! Schroeder-style reverb: parallel damped combs into series allpasses
//!
//! Delay lengths are the classic Freeverb tunings at 44.1 kHz, scaled to the
//! working rate. The large room doubles the comb lengths and lengthens the
//! tail.

use super::MonoNode;
use crate::model::track::{ReverbParams, RoomSize};

const REFERENCE_SAMPLE_RATE: f64 = 44100.0;
const COMB_DELAYS: [usize; 4] = [1116, 1277, 1422, 1557];
const ALLPASS_DELAYS: [usize; 2] = [556, 341];
const ALLPASS_GAIN: f32 = 0.5;
const DAMPING: f32 = 0.3;
/// Comb input scaling so the wet signal stays near unity
const INPUT_GAIN: f32 = 0.1;

#[derive(Debug, Clone)]
struct Comb {
    buffer: Vec<f32>,
    pos: usize,
    feedback: f32,
    filter_state: f32,
}

impl Comb {
    fn new(len: usize, feedback: f32) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            pos: 0,
            feedback,
            filter_state: 0.0,
        }
    }

    fn process(&mut self, input: f32) -> f32 {
        let output = self.buffer[self.pos];
        self.filter_state = output * (1.0 - DAMPING) + self.filter_state * DAMPING;
        self.buffer[self.pos] = input + self.filter_state * self.feedback;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.filter_state = 0.0;
        self.pos = 0;
    }
}

#[derive(Debug, Clone)]
struct Allpass {
    buffer: Vec<f32>,
    pos: usize,
}

impl Allpass {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            pos: 0,
        }
    }

    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.pos];
        let output = delayed - ALLPASS_GAIN * input;
        self.buffer[self.pos] = input + ALLPASS_GAIN * output;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.pos = 0;
    }
}

#[derive(Debug, Clone)]
pub struct RoomReverb {
    combs: Vec<Comb>,
    allpasses: Vec<Allpass>,
    wet: f32,
}

impl RoomReverb {
    pub fn new(params: &ReverbParams, sample_rate: u32) -> Self {
        let scale = sample_rate as f64 / REFERENCE_SAMPLE_RATE;
        let (size, feedback) = match params.room {
            RoomSize::Small => (1.0, 0.7),
            RoomSize::Large => (2.0, 0.84),
        };
        Self {
            combs: COMB_DELAYS
                .iter()
                .map(|&d| Comb::new((d as f64 * scale * size) as usize, feedback))
                .collect(),
            allpasses: ALLPASS_DELAYS
                .iter()
                .map(|&d| Allpass::new((d as f64 * scale) as usize))
                .collect(),
            wet: params.wet_mix.clamp(0.0, 1.0),
        }
    }
}

impl MonoNode for RoomReverb {
    fn process(&mut self, block: &mut [f32]) {
        if self.wet <= 0.0 {
            return;
        }
        for sample in block.iter_mut() {
            let input = *sample * INPUT_GAIN;
            let mut tail: f32 = self.combs.iter_mut().map(|c| c.process(input)).sum();
            for allpass in &mut self.allpasses {
                tail = allpass.process(tail);
            }
            *sample = *sample * (1.0 - self.wet) + tail * self.wet;
        }
    }

    fn reset(&mut self) {
        self.combs.iter_mut().for_each(Comb::clear);
        self.allpasses.iter_mut().for_each(Allpass::clear);
    }

    fn name(&self) -> &'static str {
        "reverb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::peak;

    #[test]
    fn test_impulse_produces_a_tail() {
        let params = ReverbParams {
            wet_mix: 1.0,
            room: RoomSize::Large,
        };
        let mut reverb = RoomReverb::new(&params, 48000);
        let mut block = vec![0.0; 48000];
        block[0] = 1.0;
        reverb.process(&mut block);

        assert!(peak(&block[24000..]) > 0.0);
        assert!(block.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_reset_clears_tail() {
        let params = ReverbParams {
            wet_mix: 1.0,
            room: RoomSize::Small,
        };
        let mut reverb = RoomReverb::new(&params, 48000);
        let mut block = vec![1.0; 4800];
        reverb.process(&mut block);
        reverb.reset();

        let mut silence = vec![0.0; 4800];
        reverb.process(&mut silence);
        assert_eq!(peak(&silence), 0.0);
    }
}
