//! Per-track effect chain and the main bus

use std::f32::consts::FRAC_PI_4;

use super::{MonoNode, NodeFactory, StereoNode};
use crate::engine::buffer::db_to_linear;
use crate::error::{FourtrackError, Result};
use crate::model::TrackFx;

/// EQ → delay → reverb → distortion → track mixer
pub struct TrackChain {
    nodes: Vec<Box<dyn MonoNode>>,
    left_gain: f32,
    right_gain: f32,
    scratch: Vec<f32>,
}

impl TrackChain {
    /// Build the chain for one track
    ///
    /// A factory failure is reported as `GraphSetup` for that track.
    pub fn build(track: usize, fx: &TrackFx, factory: &dyn NodeFactory, sample_rate: u32) -> Result<Self> {
        let graph_error = |e: FourtrackError| FourtrackError::GraphSetup {
            track,
            reason: e.to_string(),
        };

        let nodes = vec![
            factory.eq(&fx.eq_bands, sample_rate).map_err(graph_error)?,
            factory.delay(&fx.delay, sample_rate).map_err(graph_error)?,
            factory.reverb(&fx.reverb, sample_rate).map_err(graph_error)?,
            factory.distortion(&fx.saturation, sample_rate).map_err(graph_error)?,
        ];

        // Constant-power pan: -1 is hard left, 1 hard right
        let volume = db_to_linear(fx.volume_db);
        let angle = (fx.pan.clamp(-1.0, 1.0) + 1.0) * FRAC_PI_4;

        Ok(Self {
            nodes,
            left_gain: volume * angle.cos(),
            right_gain: volume * angle.sin(),
            scratch: Vec::new(),
        })
    }

    /// Node names in processing order
    pub fn topology(&self) -> Vec<&'static str> {
        self.nodes.iter().map(|n| n.name()).collect()
    }

    /// Run a mono block through the chain and add it to the stereo mix
    pub fn process_into(&mut self, input: &[f32], left: &mut [f32], right: &mut [f32]) {
        self.scratch.clear();
        self.scratch.extend_from_slice(input);
        for node in &mut self.nodes {
            node.process(&mut self.scratch);
        }
        for ((s, l), r) in self.scratch.iter().zip(left.iter_mut()).zip(right.iter_mut()) {
            *l += s * self.left_gain;
            *r += s * self.right_gain;
        }
    }

    pub fn reset(&mut self) {
        for node in &mut self.nodes {
            node.reset();
        }
    }
}

/// Main mixer followed by the limiter
pub struct MainBus {
    limiter: Box<dyn StereoNode>,
}

impl MainBus {
    pub fn build(factory: &dyn NodeFactory, sample_rate: u32) -> Result<Self> {
        let limiter = factory.limiter(sample_rate).map_err(|e| FourtrackError::EngineSetup {
            reason: format!("main bus limiter: {}", e),
        })?;
        Ok(Self { limiter })
    }

    /// Limit the summed track outputs in place
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.limiter.process(left, right);
    }

    pub fn reset(&mut self) {
        self.limiter.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fx::StockNodes;
    use approx::assert_relative_eq;

    #[test]
    fn test_topology_order() {
        let chain = TrackChain::build(0, &TrackFx::default(), &StockNodes, 48000).unwrap();
        assert_eq!(chain.topology(), vec!["eq", "delay", "reverb", "distortion"]);
    }

    #[test]
    fn test_default_chain_is_transparent_apart_from_pan_law() {
        let mut chain = TrackChain::build(0, &TrackFx::default(), &StockNodes, 48000).unwrap();
        let input = vec![0.5; 16];
        let mut left = vec![0.0; 16];
        let mut right = vec![0.0; 16];
        chain.process_into(&input, &mut left, &mut right);

        let centre = 0.5 * std::f32::consts::FRAC_1_SQRT_2;
        assert_relative_eq!(left[7], centre, epsilon = 1e-6);
        assert_relative_eq!(right[7], centre, epsilon = 1e-6);
    }

    #[test]
    fn test_hard_pan_and_volume() {
        let fx = TrackFx {
            pan: -1.0,
            volume_db: -6.0,
            ..TrackFx::default()
        };
        let mut chain = TrackChain::build(2, &fx, &StockNodes, 48000).unwrap();
        let mut left = vec![0.0; 4];
        let mut right = vec![0.0; 4];
        chain.process_into(&[1.0; 4], &mut left, &mut right);

        assert_relative_eq!(left[0], db_to_linear(-6.0), epsilon = 1e-6);
        assert!(right[0].abs() < 1e-6);
    }

    struct BrokenFactory;

    impl NodeFactory for BrokenFactory {
        fn eq(&self, bands: &[crate::model::EqBand; 4], sr: u32) -> Result<Box<dyn MonoNode>> {
            StockNodes.eq(bands, sr)
        }
        fn delay(&self, _: &crate::model::DelayParams, _: u32) -> Result<Box<dyn MonoNode>> {
            Err(FourtrackError::EngineSetup {
                reason: "no delay unit".to_string(),
            })
        }
        fn reverb(&self, p: &crate::model::ReverbParams, sr: u32) -> Result<Box<dyn MonoNode>> {
            StockNodes.reverb(p, sr)
        }
        fn distortion(&self, p: &crate::model::SaturationParams, sr: u32) -> Result<Box<dyn MonoNode>> {
            StockNodes.distortion(p, sr)
        }
        fn limiter(&self, sr: u32) -> Result<Box<dyn StereoNode>> {
            StockNodes.limiter(sr)
        }
    }

    #[test]
    fn test_factory_failure_is_graph_setup() {
        let err = TrackChain::build(3, &TrackFx::default(), &BrokenFactory, 48000).err().unwrap();
        assert!(matches!(err, FourtrackError::GraphSetup { track: 3, .. }));
    }
}
