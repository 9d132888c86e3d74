//! Effect nodes and the per-track graph
//!
//! Effect units are parameterizable black boxes behind [`MonoNode`] and
//! [`StereoNode`]; a [`NodeFactory`] builds them from a track's
//! [`TrackFx`](crate::model::TrackFx). The connection topology is fixed:
//! input → EQ → delay → reverb → distortion → track mixer → main mixer →
//! limiter → output.

mod chain;
mod delay;
mod eq;
mod limiter;
mod reverb;
mod saturation;

pub use chain::{MainBus, TrackChain};
pub use delay::FeedbackDelay;
pub use eq::TrackEq;
pub use limiter::{PeakLimiter, DEFAULT_CEILING_DB};
pub use reverb::RoomReverb;
pub use saturation::TapeSaturation;

use crate::error::Result;
use crate::model::track::{DelayParams, EqBand, ReverbParams, SaturationParams, EQ_BAND_COUNT};

/// Mono audio node processing blocks in place
pub trait MonoNode: Send {
    fn process(&mut self, block: &mut [f32]);

    /// Clear internal state (filter history, delay lines)
    fn reset(&mut self);

    fn name(&self) -> &'static str;
}

/// Stereo audio node processing blocks in place
pub trait StereoNode: Send {
    fn process(&mut self, left: &mut [f32], right: &mut [f32]);

    fn reset(&mut self);
}

/// Builds effect units for a given working rate
pub trait NodeFactory: Send + Sync {
    fn eq(&self, bands: &[EqBand; EQ_BAND_COUNT], sample_rate: u32) -> Result<Box<dyn MonoNode>>;

    fn delay(&self, params: &DelayParams, sample_rate: u32) -> Result<Box<dyn MonoNode>>;

    fn reverb(&self, params: &ReverbParams, sample_rate: u32) -> Result<Box<dyn MonoNode>>;

    fn distortion(&self, params: &SaturationParams, sample_rate: u32) -> Result<Box<dyn MonoNode>>;

    fn limiter(&self, sample_rate: u32) -> Result<Box<dyn StereoNode>>;
}

/// The built-in units
#[derive(Debug, Clone, Copy, Default)]
pub struct StockNodes;

impl NodeFactory for StockNodes {
    fn eq(&self, bands: &[EqBand; EQ_BAND_COUNT], sample_rate: u32) -> Result<Box<dyn MonoNode>> {
        Ok(Box::new(TrackEq::new(bands, sample_rate)))
    }

    fn delay(&self, params: &DelayParams, sample_rate: u32) -> Result<Box<dyn MonoNode>> {
        Ok(Box::new(FeedbackDelay::new(params, sample_rate)))
    }

    fn reverb(&self, params: &ReverbParams, sample_rate: u32) -> Result<Box<dyn MonoNode>> {
        Ok(Box::new(RoomReverb::new(params, sample_rate)))
    }

    fn distortion(&self, params: &SaturationParams, _sample_rate: u32) -> Result<Box<dyn MonoNode>> {
        Ok(Box::new(TapeSaturation::new(params)))
    }

    fn limiter(&self, sample_rate: u32) -> Result<Box<dyn StereoNode>> {
        Ok(Box::new(PeakLimiter::new(DEFAULT_CEILING_DB, sample_rate)))
    }
}
