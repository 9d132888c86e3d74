//! Region Pre-Renderer
//!
//! Computes each region's final audio once, before playback, recording or a
//! bounce starts: read the source window, fold to mono, resample to the
//! working rate, then reverse, fade and gain. The real-time path only ever
//! slices the results.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::engine::buffer::db_to_linear;
use crate::engine::clock::secs_to_frames;
use crate::engine::io::resample_linear;
use crate::engine::source::SourceResolver;
use crate::error::{FourtrackError, Result};
use crate::model::{Region, RegionId, Session};

// ============================================================================
// Cache
// ============================================================================

/// Offset/length view into a pre-rendered buffer
#[derive(Debug, Clone)]
pub struct BufferSlice {
    data: Arc<Vec<f32>>,
    offset: usize,
    len: usize,
}

impl BufferSlice {
    /// View `len` frames starting at `offset`, clamped to the buffer
    pub fn new(data: Arc<Vec<f32>>, offset: usize, len: usize) -> Self {
        let offset = offset.min(data.len());
        let len = len.min(data.len() - offset);
        Self { data, offset, len }
    }

    pub fn samples(&self) -> &[f32] {
        &self.data[self.offset..self.offset + self.len]
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Pre-rendered buffers keyed by (track index, region id)
#[derive(Debug, Clone, Default)]
pub struct PrerenderCache {
    sample_rate: u32,
    buffers: HashMap<(usize, RegionId), Arc<Vec<f32>>>,
}

impl PrerenderCache {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            buffers: HashMap::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn insert(&mut self, track: usize, region: RegionId, samples: Vec<f32>) {
        self.buffers.insert((track, region), Arc::new(samples));
    }

    pub fn get(&self, track: usize, region: RegionId) -> Option<&Arc<Vec<f32>>> {
        self.buffers.get(&(track, region))
    }

    pub fn contains(&self, track: usize, region: RegionId) -> bool {
        self.buffers.contains_key(&(track, region))
    }

    /// Slice `frames` frames starting at `start` out of a region's buffer
    pub fn slice(&self, track: usize, region: RegionId, start: usize, frames: usize) -> Option<BufferSlice> {
        self.get(track, region)
            .map(|data| BufferSlice::new(Arc::clone(data), start, frames))
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

// ============================================================================
// Pre-Renderer
// ============================================================================

pub struct RegionPrerenderer {
    resolver: Arc<dyn SourceResolver>,
}

impl RegionPrerenderer {
    pub fn new(resolver: Arc<dyn SourceResolver>) -> Self {
        Self { resolver }
    }

    /// Render every region of the session at `sample_rate`
    ///
    /// Regions that fail to load or render are logged and left out of the
    /// cache; they simply do not play.
    pub fn render_session(&self, session: &Session, sample_rate: u32) -> PrerenderCache {
        let mut cache = PrerenderCache::new(sample_rate);
        let mut skipped = 0usize;

        for (track_index, track) in session.tracks.iter().enumerate() {
            for region in &track.regions {
                match self.render_region(region, sample_rate) {
                    Ok(samples) => {
                        debug!(
                            track = track_index,
                            region = %region.id,
                            frames = samples.len(),
                            "region pre-rendered"
                        );
                        cache.insert(track_index, region.id, samples);
                    }
                    Err(e) => {
                        skipped += 1;
                        warn!(
                            track = track_index,
                            region = %region.id,
                            error = %e,
                            "skipping region that failed to pre-render"
                        );
                    }
                }
            }
        }

        info!(
            rendered = cache.len(),
            skipped,
            sample_rate,
            "pre-render complete"
        );
        cache
    }

    /// Render a single region
    ///
    /// The output holds exactly `round(duration * sample_rate)` frames. The
    /// region's `file_start_offset` is applied here and only here.
    pub fn render_region(&self, region: &Region, sample_rate: u32) -> Result<Vec<f32>> {
        if region.duration <= 0.0 {
            return Err(FourtrackError::PrerenderFailed {
                region: region.id.to_string(),
                reason: format!("duration must be positive, got {}", region.duration),
            });
        }

        let mut source = self.resolver.open(&region.source)?;
        let source_rate = source.sample_rate();
        if source_rate == 0 {
            return Err(FourtrackError::UnsupportedFormat {
                format: format!("{} reports a 0 Hz sample rate", region.source),
            });
        }

        let start = secs_to_frames(region.file_start_offset, source_rate).max(0) as u64;
        let count = secs_to_frames(region.duration, source_rate).max(0) as usize;
        let window = source.read_frames(start, count)?;
        if window.is_empty() {
            return Err(FourtrackError::PrerenderFailed {
                region: region.id.to_string(),
                reason: format!("source window at frame {} is empty", start),
            });
        }

        let mono = window.into_mono();
        let mut samples = resample_linear(&mono, source_rate, sample_rate);

        // Short sources play silence for the rest of the region
        let target = secs_to_frames(region.duration, sample_rate).max(1) as usize;
        samples.resize(target, 0.0);

        apply_region_shaping(&mut samples, region, sample_rate);
        Ok(samples)
    }
}

/// Reverse, fade and gain a region's samples in place
pub fn apply_region_shaping(samples: &mut [f32], region: &Region, sample_rate: u32) {
    if region.reversed {
        samples.reverse();
    }

    let len = samples.len();
    if let Some(fade_in) = region.fade_in.filter(|f| *f > 0.0) {
        let n = (secs_to_frames(fade_in, sample_rate).max(0) as usize).min(len);
        for (i, s) in samples.iter_mut().take(n).enumerate() {
            *s *= i as f32 / n as f32;
        }
    }

    if let Some(fade_out) = region.fade_out.filter(|f| *f > 0.0) {
        let n = (secs_to_frames(fade_out, sample_rate).max(0) as usize).min(len);
        for (j, s) in samples[len - n..].iter_mut().enumerate() {
            *s *= (n - 1 - j) as f32 / n as f32;
        }
    }

    if let Some(gain_db) = region.gain_db.filter(|g| *g != 0.0) {
        let gain = db_to_linear(gain_db);
        for s in samples.iter_mut() {
            *s *= gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::AudioBuffer;
    use crate::engine::testing::MemoryResolver;
    use crate::model::SourceHandle;
    use approx::assert_relative_eq;

    fn ramp(frames: usize) -> Vec<f32> {
        (0..frames).map(|i| (i as f32 + 1.0) / frames as f32).collect()
    }

    fn prerenderer_with(samples: Vec<f32>, rate: u32) -> RegionPrerenderer {
        let resolver = MemoryResolver::new();
        resolver.insert("clip.wav", AudioBuffer::mono(samples, rate));
        RegionPrerenderer::new(Arc::new(resolver))
    }

    #[test]
    fn test_plain_region_matches_source_window_exactly() {
        let source = ramp(48_000);
        let pre = prerenderer_with(source.clone(), 48_000);
        let mut region = Region::new(SourceHandle::new("clip.wav"), 2.0, 0.25);
        region.file_start_offset = 0.5;
        region.fade_in = Some(0.0);
        region.fade_out = Some(0.0);
        region.gain_db = Some(0.0);

        let rendered = pre.render_region(&region, 48_000).unwrap();
        assert_eq!(rendered.as_slice(), &source[24_000..36_000]);
    }

    #[test]
    fn test_file_start_offset_applied_once() {
        let source = ramp(1000);
        let pre = prerenderer_with(source.clone(), 1000);
        let mut region = Region::new(SourceHandle::new("clip.wav"), 0.0, 0.1);
        region.file_start_offset = 0.3;

        let rendered = pre.render_region(&region, 1000).unwrap();
        // First sample is source frame 300, not 600
        assert_eq!(rendered[0], source[300]);
        assert_eq!(rendered.len(), 100);
    }

    #[test]
    fn test_reversing_twice_restores_order() {
        let pre = prerenderer_with(ramp(500), 1000);
        let mut region = Region::new(SourceHandle::new("clip.wav"), 0.0, 0.5);
        let forward = pre.render_region(&region, 1000).unwrap();

        region.reversed = true;
        let mut twice = pre.render_region(&region, 1000).unwrap();
        assert_eq!(twice[0], forward[forward.len() - 1]);
        twice.reverse();
        assert_eq!(twice, forward);
    }

    #[test]
    fn test_fades_and_gain() {
        let pre = prerenderer_with(vec![1.0; 1000], 1000);
        let mut region = Region::new(SourceHandle::new("clip.wav"), 0.0, 1.0);
        region.fade_in = Some(0.1);
        region.fade_out = Some(0.1);
        region.gain_db = Some(-6.0);

        let out = pre.render_region(&region, 1000).unwrap();
        let gain = db_to_linear(-6.0);
        assert_eq!(out[0], 0.0);
        assert_relative_eq!(out[50], 0.5 * gain, epsilon = 1e-6);
        assert_relative_eq!(out[500], gain, epsilon = 1e-6);
        assert_eq!(out[999], 0.0);
    }

    #[test]
    fn test_fade_longer_than_region_is_clamped() {
        let pre = prerenderer_with(vec![1.0; 100], 1000);
        let mut region = Region::new(SourceHandle::new("clip.wav"), 0.0, 0.1);
        region.fade_in = Some(5.0);
        let out = pre.render_region(&region, 1000).unwrap();
        assert_eq!(out.len(), 100);
        assert_relative_eq!(out[99], 0.99, epsilon = 1e-6);
    }

    #[test]
    fn test_resamples_to_working_rate() {
        let pre = prerenderer_with(vec![0.5; 44_100], 44_100);
        let region = Region::new(SourceHandle::new("clip.wav"), 0.0, 1.0);
        let out = pre.render_region(&region, 48_000).unwrap();
        assert_eq!(out.len(), 48_000);
        assert_relative_eq!(out[1000], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_short_source_is_padded_with_silence() {
        let pre = prerenderer_with(vec![1.0; 50], 1000);
        let region = Region::new(SourceHandle::new("clip.wav"), 0.0, 0.1);
        let out = pre.render_region(&region, 1000).unwrap();
        assert_eq!(out.len(), 100);
        assert_eq!(out[49], 1.0);
        assert_eq!(out[50], 0.0);
    }

    #[test]
    fn test_failed_regions_are_skipped() {
        let pre = prerenderer_with(vec![0.1; 1000], 1000);
        let mut session = Session::new("s", 60.0);
        let good = session
            .add_region(0, Region::new(SourceHandle::new("clip.wav"), 0.0, 0.5))
            .unwrap();
        let bad = session
            .add_region(1, Region::new(SourceHandle::new("missing.wav"), 0.0, 0.5))
            .unwrap();

        let cache = pre.render_session(&session, 1000);
        assert!(cache.contains(0, good));
        assert!(!cache.contains(1, bad));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_slice_is_clamped() {
        let data = Arc::new(vec![1.0, 2.0, 3.0]);
        let slice = BufferSlice::new(data, 2, 10);
        assert_eq!(slice.samples(), &[3.0]);
    }
}
