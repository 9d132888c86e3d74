//! Tape-style distortion: tanh waveshaper with pre-gain

use super::MonoNode;
use crate::engine::buffer::db_to_linear;
use crate::model::track::SaturationParams;

#[derive(Debug, Clone)]
pub struct TapeSaturation {
    drive: f32,
    /// Output trim so a unity-level signal comes back near unity
    makeup: f32,
    wet: f32,
}

impl TapeSaturation {
    pub fn new(params: &SaturationParams) -> Self {
        let drive = db_to_linear(params.pre_gain.clamp(-24.0, 36.0));
        Self {
            drive,
            makeup: 1.0 / drive.tanh(),
            wet: params.wet_mix.clamp(0.0, 1.0),
        }
    }
}

impl MonoNode for TapeSaturation {
    fn process(&mut self, block: &mut [f32]) {
        if self.wet <= 0.0 {
            return;
        }
        for sample in block.iter_mut() {
            let shaped = (*sample * self.drive).tanh() * self.makeup;
            *sample = *sample * (1.0 - self.wet) + shaped * self.wet;
        }
    }

    fn reset(&mut self) {}

    fn name(&self) -> &'static str {
        "distortion"
    }
}
