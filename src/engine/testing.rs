//! In-memory collaborators
//!
//! Stand-ins for source storage, disk space, the wall clock and audio
//! devices. Integration tests use them, and so can hosts that want to drive
//! the engine headless.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::engine::buffer::AudioBuffer;
use crate::engine::clock::WallClock;
use crate::engine::device::{CaptureTap, DeviceFormat, InputDevice, OutputDevice};
use crate::engine::prerender::BufferSlice;
use crate::engine::source::{AudioSource, SourceResolver};
use crate::engine::space::SpaceProbe;
use crate::error::{FourtrackError, Result};
use crate::fx::{MainBus, TrackChain};
use crate::model::{SourceHandle, TRACK_COUNT};

// ============================================================================
// Sources
// ============================================================================

/// Source backed by an in-memory buffer
pub struct MemorySource {
    buffer: AudioBuffer,
}

impl MemorySource {
    pub fn new(buffer: AudioBuffer) -> Self {
        Self { buffer }
    }
}

impl AudioSource for MemorySource {
    fn sample_rate(&self) -> u32 {
        self.buffer.sample_rate
    }

    fn channels(&self) -> u16 {
        self.buffer.channels() as u16
    }

    fn total_frames(&self) -> u64 {
        self.buffer.len() as u64
    }

    fn read_frames(&mut self, offset: u64, count: usize) -> Result<AudioBuffer> {
        let len = self.buffer.len();
        let start = (offset as usize).min(len);
        let end = start.saturating_add(count).min(len);
        Ok(AudioBuffer {
            samples: self
                .buffer
                .samples
                .iter()
                .map(|ch| ch[start..end].to_vec())
                .collect(),
            sample_rate: self.buffer.sample_rate,
        })
    }
}

/// Resolver over named in-memory buffers
#[derive(Clone, Default)]
pub struct MemoryResolver {
    sources: Arc<RwLock<HashMap<String, AudioBuffer>>>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, buffer: AudioBuffer) {
        self.sources.write().insert(name.into(), buffer);
    }
}

impl SourceResolver for MemoryResolver {
    fn open(&self, handle: &SourceHandle) -> Result<Box<dyn AudioSource>> {
        let buffer = self
            .sources
            .read()
            .get(handle.as_str())
            .cloned()
            .ok_or_else(|| FourtrackError::SourceUnavailable {
                handle: handle.to_string(),
                source: None,
            })?;
        Ok(Box::new(MemorySource::new(buffer)))
    }
}

// ============================================================================
// Space and Time
// ============================================================================

/// Reports a settable free-space figure
#[derive(Clone, Default)]
pub struct FixedSpace {
    bytes: Arc<AtomicU64>,
}

impl FixedSpace {
    pub fn new(bytes: u64) -> Self {
        Self {
            bytes: Arc::new(AtomicU64::new(bytes)),
        }
    }

    pub fn set(&self, bytes: u64) {
        self.bytes.store(bytes, Ordering::SeqCst);
    }
}

impl SpaceProbe for FixedSpace {
    fn available_bytes(&self, _path: &Path) -> Result<u64> {
        Ok(self.bytes.load(Ordering::SeqCst))
    }
}

/// Wall clock that only moves when told to
#[derive(Clone, Default)]
pub struct ManualClock {
    secs: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, secs: f64) {
        *self.secs.lock() = secs;
    }

    pub fn advance(&self, secs: f64) {
        *self.secs.lock() += secs;
    }
}

impl WallClock for ManualClock {
    fn now_secs(&self) -> f64 {
        *self.secs.lock()
    }
}

// ============================================================================
// Devices
// ============================================================================

/// One buffer handed to a fake output player
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledCall {
    pub track: usize,
    pub at_sample: i64,
    pub samples: Vec<f32>,
}

impl ScheduledCall {
    pub fn end_sample(&self) -> i64 {
        self.at_sample + self.samples.len() as i64
    }
}

#[derive(Debug, Default)]
struct OutputLog {
    running: bool,
    sample_time: Option<i64>,
    latency: f64,
    scheduled: Vec<ScheduledCall>,
    cleared: Vec<usize>,
    starts: u32,
}

/// Effect graph handed to a fake output
#[derive(Default)]
struct InstalledGraph {
    tracks: [Option<TrackChain>; TRACK_COUNT],
    chain_installs: [u32; TRACK_COUNT],
    bus: Option<MainBus>,
}

/// Inspection and control side of a [`FakeOutput`]
#[derive(Clone)]
pub struct OutputMonitor {
    log: Arc<Mutex<OutputLog>>,
    graph: Arc<Mutex<InstalledGraph>>,
}

impl OutputMonitor {
    /// Run a mono block through the chain installed on a track
    ///
    /// `None` until a chain has been installed for that track.
    pub fn render_track(&self, track: usize, input: &[f32]) -> Option<(Vec<f32>, Vec<f32>)> {
        let mut graph = self.graph.lock();
        let chain = graph.tracks.get_mut(track)?.as_mut()?;
        let mut left = vec![0.0; input.len()];
        let mut right = vec![0.0; input.len()];
        chain.process_into(input, &mut left, &mut right);
        Some((left, right))
    }

    /// How many chains have been installed on a track
    pub fn chain_installs(&self, track: usize) -> u32 {
        self.graph.lock().chain_installs.get(track).copied().unwrap_or(0)
    }

    pub fn has_main_bus(&self) -> bool {
        self.graph.lock().bus.is_some()
    }

    pub fn scheduled(&self) -> Vec<ScheduledCall> {
        self.log.lock().scheduled.clone()
    }

    pub fn scheduled_on(&self, track: usize) -> Vec<ScheduledCall> {
        self.log
            .lock()
            .scheduled
            .iter()
            .filter(|c| c.track == track)
            .cloned()
            .collect()
    }

    pub fn cleared(&self) -> Vec<usize> {
        self.log.lock().cleared.clone()
    }

    pub fn is_running(&self) -> bool {
        self.log.lock().running
    }

    pub fn starts(&self) -> u32 {
        self.log.lock().starts
    }

    /// Move the hardware sample counter forward
    pub fn advance(&self, frames: i64) {
        let mut log = self.log.lock();
        if let Some(t) = log.sample_time.as_mut() {
            *t += frames;
        }
    }

    pub fn set_latency(&self, secs: f64) {
        self.log.lock().latency = secs;
    }
}

/// Output device that records what was scheduled
pub struct FakeOutput {
    format: DeviceFormat,
    start_sample: i64,
    log: Arc<Mutex<OutputLog>>,
    graph: Arc<Mutex<InstalledGraph>>,
}

impl FakeOutput {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            format: DeviceFormat {
                sample_rate,
                channels: 2,
            },
            start_sample: 0,
            log: Arc::new(Mutex::new(OutputLog::default())),
            graph: Arc::new(Mutex::new(InstalledGraph::default())),
        }
    }

    /// Sample counter value the device reports once started
    pub fn starting_at(mut self, sample: i64) -> Self {
        self.start_sample = sample;
        self
    }

    pub fn with_latency(self, secs: f64) -> Self {
        self.log.lock().latency = secs;
        self
    }

    pub fn monitor(&self) -> OutputMonitor {
        OutputMonitor {
            log: Arc::clone(&self.log),
            graph: Arc::clone(&self.graph),
        }
    }
}

impl OutputDevice for FakeOutput {
    fn format(&self) -> DeviceFormat {
        self.format
    }

    fn start(&mut self) -> Result<()> {
        let mut log = self.log.lock();
        log.running = true;
        log.starts += 1;
        if log.sample_time.is_none() {
            log.sample_time = Some(self.start_sample);
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.log.lock().running = false;
    }

    fn is_running(&self) -> bool {
        self.log.lock().running
    }

    fn current_sample_time(&self) -> Option<i64> {
        let log = self.log.lock();
        if log.running {
            log.sample_time
        } else {
            None
        }
    }

    fn round_trip_latency(&self) -> f64 {
        self.log.lock().latency
    }

    fn schedule(&mut self, track: usize, slice: BufferSlice, at_sample: i64) -> Result<()> {
        let mut log = self.log.lock();
        if !log.running {
            return Err(FourtrackError::DeviceNotRunning);
        }
        log.scheduled.push(ScheduledCall {
            track,
            at_sample,
            samples: slice.samples().to_vec(),
        });
        Ok(())
    }

    fn clear_track(&mut self, track: usize) {
        self.log.lock().cleared.push(track);
    }

    fn set_track_chain(&mut self, track: usize, chain: TrackChain) -> Result<()> {
        if track >= TRACK_COUNT {
            return Err(FourtrackError::TrackOutOfRange { index: track });
        }
        let mut graph = self.graph.lock();
        graph.tracks[track] = Some(chain);
        graph.chain_installs[track] += 1;
        Ok(())
    }

    fn set_main_bus(&mut self, bus: MainBus) -> Result<()> {
        self.graph.lock().bus = Some(bus);
        Ok(())
    }
}

#[derive(Default)]
struct InputState {
    tap: Option<Box<dyn CaptureTap>>,
    installs: u32,
}

/// Drives a [`FakeInput`]'s tap from test code
#[derive(Clone)]
pub struct InputMonitor {
    state: Arc<Mutex<InputState>>,
}

impl InputMonitor {
    /// Deliver one interleaved buffer to the installed tap, as the
    /// real-time thread would
    ///
    /// Returns false when no tap is installed.
    pub fn push(&self, samples: &[f32]) -> bool {
        match self.state.lock().tap.as_mut() {
            Some(tap) => {
                tap.on_buffer(samples);
                true
            }
            None => false,
        }
    }

    pub fn has_tap(&self) -> bool {
        self.state.lock().tap.is_some()
    }

    /// How many taps have ever been installed
    pub fn installs(&self) -> u32 {
        self.state.lock().installs
    }
}

/// Input device whose buffers are pushed by hand
pub struct FakeInput {
    format: DeviceFormat,
    state: Arc<Mutex<InputState>>,
}

impl FakeInput {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            format: DeviceFormat {
                sample_rate,
                channels,
            },
            state: Arc::new(Mutex::new(InputState::default())),
        }
    }

    pub fn monitor(&self) -> InputMonitor {
        InputMonitor {
            state: Arc::clone(&self.state),
        }
    }
}

impl InputDevice for FakeInput {
    fn format(&self) -> DeviceFormat {
        self.format
    }

    fn install_tap(&mut self, tap: Box<dyn CaptureTap>) -> Result<()> {
        let mut state = self.state.lock();
        state.tap = Some(tap);
        state.installs += 1;
        Ok(())
    }

    fn remove_tap(&mut self) -> Option<Box<dyn CaptureTap>> {
        self.state.lock().tap.take()
    }

    fn has_tap(&self) -> bool {
        self.state.lock().tap.is_some()
    }
}
