//! Disconnected offline render graph

use crate::engine::clock::secs_to_frames;
use crate::engine::prerender::PrerenderCache;
use crate::error::{FourtrackError, Result};
use crate::fx::{MainBus, NodeFactory, TrackChain};
use crate::model::{RegionId, Session};

struct TrackSource {
    index: usize,
    muted: bool,
    /// (region, first timeline frame)
    regions: Vec<(RegionId, u64)>,
    chain: TrackChain,
}

/// Per-track chains plus main bus, driven block by block
pub struct OfflineRender {
    tracks: Vec<TrackSource>,
    bus: MainBus,
    cache: PrerenderCache,
    mono: Vec<f32>,
}

impl OfflineRender {
    /// Build an isolated copy of the session's effect graph
    pub fn build(session: &Session, factory: &dyn NodeFactory, sample_rate: u32) -> Result<Self> {
        let mut tracks = Vec::with_capacity(session.tracks.len());
        for (index, track) in session.tracks.iter().enumerate() {
            tracks.push(TrackSource {
                index,
                muted: track.is_muted,
                regions: track
                    .regions
                    .iter()
                    .map(|r| (r.id, secs_to_frames(r.start_time, sample_rate).max(0) as u64))
                    .collect(),
                chain: TrackChain::build(index, &track.fx, factory, sample_rate)?,
            });
        }

        Ok(Self {
            tracks,
            bus: MainBus::build(factory, sample_rate)?,
            cache: PrerenderCache::new(sample_rate),
            mono: Vec::new(),
        })
    }

    /// Use these pre-rendered region buffers
    pub fn attach(&mut self, cache: PrerenderCache) {
        self.cache = cache;
    }

    /// Mix the block starting at timeline frame `position` into `left`/`right`
    pub fn render_block(&mut self, position: u64, left: &mut [f32], right: &mut [f32]) -> Result<()> {
        let frames = left.len().min(right.len());
        left.fill(0.0);
        right.fill(0.0);
        let block_end = position + frames as u64;

        for track in &mut self.tracks {
            if track.muted {
                continue;
            }
            self.mono.clear();
            self.mono.resize(frames, 0.0);

            for &(id, start) in &track.regions {
                let Some(buffer) = self.cache.get(track.index, id) else {
                    continue;
                };
                let end = start + buffer.len() as u64;
                let from = start.max(position);
                let to = end.min(block_end);
                if from >= to {
                    continue;
                }
                let src = (from - start) as usize..(to - start) as usize;
                let dst = (from - position) as usize..(to - position) as usize;
                self.mono[dst].copy_from_slice(&buffer[src]);
            }

            track.chain.process_into(&self.mono, &mut left[..frames], &mut right[..frames]);
        }

        self.bus.process(&mut left[..frames], &mut right[..frames]);

        if let Some(i) = left[..frames]
            .iter()
            .zip(&right[..frames])
            .position(|(l, r)| !l.is_finite() || !r.is_finite())
        {
            return Err(FourtrackError::RenderFailed {
                frame: position + i as u64,
                reason: "non-finite sample in mix".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fx::StockNodes;
    use crate::model::{Region, SourceHandle};
    use approx::assert_relative_eq;

    #[test]
    fn test_region_lands_on_its_frame() {
        let mut session = Session::new("s", 60.0);
        let region = Region::new(SourceHandle::new("a.wav"), 0.01, 0.005);
        let id = session.add_region(1, region).unwrap();

        let mut render = OfflineRender::build(&session, &StockNodes, 1000).unwrap();
        let mut cache = PrerenderCache::new(1000);
        cache.insert(1, id, vec![0.5; 5]);
        render.attach(cache);

        let mut left = vec![0.0; 16];
        let mut right = vec![0.0; 16];
        render.render_block(0, &mut left, &mut right).unwrap();

        let centre = 0.5 * std::f32::consts::FRAC_1_SQRT_2;
        assert_eq!(left[9], 0.0);
        assert_relative_eq!(left[10], centre, epsilon = 1e-6);
        assert_relative_eq!(right[14], centre, epsilon = 1e-6);
        assert_eq!(left[15], 0.0);
    }

    #[test]
    fn test_muted_track_is_silent() {
        let mut session = Session::new("s", 60.0);
        let id = session
            .add_region(0, Region::new(SourceHandle::new("a.wav"), 0.0, 0.01))
            .unwrap();
        session.set_track_muted(0, true).unwrap();

        let mut render = OfflineRender::build(&session, &StockNodes, 1000).unwrap();
        let mut cache = PrerenderCache::new(1000);
        cache.insert(0, id, vec![0.5; 10]);
        render.attach(cache);

        let mut left = vec![0.0; 10];
        let mut right = vec![0.0; 10];
        render.render_block(0, &mut left, &mut right).unwrap();
        assert!(left.iter().all(|s| *s == 0.0));
    }
}
