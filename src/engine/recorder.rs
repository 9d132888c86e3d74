//! Recorder
//!
//! Captures live input into a take file. The capture tap runs on the
//! real-time input thread and only meters the buffer and hands it to a
//! bounded queue; a background worker owns the WAV writer and re-checks free
//! space as the take grows. On stop the take is placed on the timeline with
//! latency compensation.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use hound::{WavReader, WavWriter};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::engine::buffer::{linear_to_db, peak, rms};
use crate::engine::clock::{secs_to_frames, WallClock};
use crate::engine::device::{CaptureTap, Engine, EngineHandle};
use crate::engine::events::EngineEvent;
use crate::engine::io::SampleEncoding;
use crate::engine::space::SpaceProbe;
use crate::error::{FourtrackError, Result};
use crate::model::{Region, SourceHandle};

// ============================================================================
// Level Metering
// ============================================================================

/// Peak and RMS of the most recent input buffer
///
/// Written from the real-time thread, read from anywhere.
#[derive(Debug, Default)]
pub struct LevelMeter {
    peak: AtomicU32,
    rms: AtomicU32,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, samples: &[f32]) {
        self.peak.store(peak(samples).to_bits(), Ordering::Relaxed);
        self.rms.store(rms(samples).to_bits(), Ordering::Relaxed);
    }

    /// Linear peak
    pub fn peak(&self) -> f32 {
        f32::from_bits(self.peak.load(Ordering::Relaxed))
    }

    /// Linear RMS
    pub fn rms(&self) -> f32 {
        f32::from_bits(self.rms.load(Ordering::Relaxed))
    }

    pub fn peak_db(&self) -> f32 {
        linear_to_db(self.peak())
    }

    pub fn reset(&self) {
        self.peak.store(0, Ordering::Relaxed);
        self.rms.store(0, Ordering::Relaxed);
    }
}

/// Always-on tap that only meters
pub struct MeterTap {
    meter: Arc<LevelMeter>,
}

impl MeterTap {
    pub fn new(meter: Arc<LevelMeter>) -> Self {
        Self { meter }
    }
}

impl CaptureTap for MeterTap {
    fn on_buffer(&mut self, samples: &[f32]) {
        self.meter.update(samples);
    }
}

// ============================================================================
// Capture Tap
// ============================================================================

/// Counters shared between the capture tap and the coordinating context
#[derive(Debug)]
struct CaptureStats {
    buffers: AtomicU64,
    dropped: AtomicU64,
    /// Wall time of the first buffer as f64 bits; NaN until it arrives
    first_buffer_at: AtomicU64,
}

impl CaptureStats {
    fn new() -> Self {
        Self {
            buffers: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            first_buffer_at: AtomicU64::new(f64::NAN.to_bits()),
        }
    }

    fn first_buffer_at(&self) -> Option<f64> {
        let t = f64::from_bits(self.first_buffer_at.load(Ordering::Acquire));
        (!t.is_nan()).then_some(t)
    }
}

/// Samples each pooled capture buffer can hold before it has to grow
const POOL_BUFFER_SAMPLES: usize = 4096;

/// Preallocated capture buffers cycling between the tap and the writer
///
/// The tap takes an empty buffer from `free`, fills it and queues it; the
/// writer hands it back once written. The tap never allocates unless a
/// callback is larger than every buffer seen so far.
struct BufferPool {
    free_tx: Sender<Vec<f32>>,
    free_rx: Receiver<Vec<f32>>,
}

impl BufferPool {
    fn new(buffers: usize) -> Self {
        let (free_tx, free_rx) = bounded(buffers);
        for _ in 0..buffers {
            let _ = free_tx.try_send(Vec::with_capacity(POOL_BUFFER_SAMPLES));
        }
        Self { free_tx, free_rx }
    }
}

/// Capture callback state for one take
struct TakeTap {
    meter: Arc<LevelMeter>,
    queue: Sender<Vec<f32>>,
    free: Receiver<Vec<f32>>,
    stats: Arc<CaptureStats>,
    clock: Arc<dyn WallClock>,
    seen_first: bool,
}

impl CaptureTap for TakeTap {
    fn on_buffer(&mut self, samples: &[f32]) {
        if !self.seen_first {
            self.seen_first = true;
            self.stats
                .first_buffer_at
                .store(self.clock.now_secs().to_bits(), Ordering::Release);
        }
        self.meter.update(samples);
        self.stats.buffers.fetch_add(1, Ordering::Relaxed);

        // Never block the real-time thread; with every buffer in flight the
        // callback's audio is dropped
        let Ok(mut buffer) = self.free.try_recv() else {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        buffer.clear();
        buffer.extend_from_slice(samples);
        match self.queue.try_send(buffer) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

// ============================================================================
// Background Writer
// ============================================================================

struct TakeWriter {
    writer: WavWriter<BufWriter<File>>,
    channels: usize,
    frames_written: u64,
    check_every: u64,
    next_check: u64,
    takes_dir: PathBuf,
    min_free_bytes: u64,
    space: Arc<dyn SpaceProbe>,
    events: Sender<EngineEvent>,
    halted: bool,
}

impl TakeWriter {
    /// Drain the queue until the tap is dropped, then finalize the file
    ///
    /// Returns the number of frames written. Every buffer goes back to the
    /// pool through `recycle`.
    fn run(mut self, queue: Receiver<Vec<f32>>, recycle: Sender<Vec<f32>>) -> Result<u64> {
        for buffer in queue.iter() {
            if !self.halted {
                self.consume(&buffer);
            }
            let _ = recycle.try_send(buffer);
        }
        self.writer.finalize()?;
        Ok(self.frames_written)
    }

    fn consume(&mut self, buffer: &[f32]) {
        if let Err(e) = self.write(buffer) {
            self.halted = true;
            warn!(error = %e, "take writer failed; discarding further input");
            let _ = self.events.send(EngineEvent::TakeWriteFailed {
                message: e.to_string(),
            });
            return;
        }
        if self.frames_written >= self.next_check {
            self.next_check = self.frames_written + self.check_every;
            self.check_space();
        }
    }

    fn write(&mut self, interleaved: &[f32]) -> Result<()> {
        let whole = interleaved.len() - interleaved.len() % self.channels;
        for &sample in &interleaved[..whole] {
            self.writer.write_sample(sample)?;
        }
        self.frames_written += (whole / self.channels) as u64;
        Ok(())
    }

    fn check_space(&mut self) {
        match self.space.available_bytes(&self.takes_dir) {
            Ok(available) if available < self.min_free_bytes => {
                self.halted = true;
                warn!(
                    available,
                    floor = self.min_free_bytes,
                    frames = self.frames_written,
                    "free space exhausted mid-take"
                );
                let _ = self.events.send(EngineEvent::DiskSpaceExhausted {
                    available_bytes: available,
                });
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "free-space re-check failed"),
        }
    }
}

// ============================================================================
// Latency Compensation
// ============================================================================

/// Where a take lands and how much of its front is cut
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub start_time: f64,
    pub trim_secs: f64,
}

/// Place a take recorded from `recording_start`
///
/// A first take plays exactly where it was armed. An overdub is moved
/// earlier by the round-trip latency; when that would be before zero, the
/// unusable lead-in is trimmed instead and the take starts at zero.
pub fn compensate(recording_start: f64, latency: f64, overdub: bool) -> Placement {
    if !overdub || latency <= 0.0 {
        return Placement {
            start_time: recording_start,
            trim_secs: 0.0,
        };
    }
    let compensated = recording_start - latency;
    if compensated >= 0.0 {
        Placement {
            start_time: compensated,
            trim_secs: 0.0,
        }
    } else {
        Placement {
            start_time: 0.0,
            trim_secs: -compensated,
        }
    }
}

/// Drop the first `frames` frames of a take file, rewriting it in place
pub fn trim_take_front(path: &Path, frames: u64) -> Result<u64> {
    let tmp = path.with_extension("trim.wav");
    let keep = {
        let mut reader = WavReader::open(path)?;
        let spec = reader.spec();
        let channels = spec.channels as usize;
        let total = reader.duration() as u64;
        let keep = total.saturating_sub(frames);

        let mut writer = WavWriter::create(&tmp, spec)?;
        reader.seek(frames.min(total) as u32)?;
        for sample in reader.samples::<f32>().take(keep as usize * channels) {
            writer.write_sample(sample?)?;
        }
        writer.finalize()?;
        keep
    };
    fs::rename(&tmp, path)?;
    Ok(keep)
}

// ============================================================================
// Recorder
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecorderState {
    #[default]
    Idle,
    Armed,
    Capturing,
    Finalizing,
}

impl std::fmt::Display for RecorderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecorderState::Idle => write!(f, "idle"),
            RecorderState::Armed => write!(f, "armed"),
            RecorderState::Capturing => write!(f, "capturing"),
            RecorderState::Finalizing => write!(f, "finalizing"),
        }
    }
}

/// What to record and how to place it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TakeRequest {
    pub track: usize,
    /// Timeline position at the instant recording was armed
    pub playhead: f64,
    /// Another track already holds audio the performer is playing along to
    pub overdub: bool,
}

/// A finalized take ready to be appended to its track
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedTake {
    pub track: usize,
    pub region: Region,
    pub placement: Placement,
    pub path: PathBuf,
    pub dropped_buffers: u64,
}

struct ActiveTake {
    request: TakeRequest,
    path: PathBuf,
    latency: f64,
    sample_rate: u32,
    armed_at: f64,
    stats: Arc<CaptureStats>,
    worker: JoinHandle<Result<u64>>,
}

pub struct Recorder {
    state: RecorderState,
    takes_dir: PathBuf,
    min_free_bytes: u64,
    space_check_interval: f64,
    queue_depth: usize,
    space: Arc<dyn SpaceProbe>,
    clock: Arc<dyn WallClock>,
    meter: Arc<LevelMeter>,
    events: Sender<EngineEvent>,
    take: Option<ActiveTake>,
}

impl Recorder {
    pub fn new(
        config: &EngineConfig,
        space: Arc<dyn SpaceProbe>,
        clock: Arc<dyn WallClock>,
        events: Sender<EngineEvent>,
    ) -> Self {
        Self {
            state: RecorderState::Idle,
            takes_dir: config.takes_dir.clone(),
            min_free_bytes: config.min_free_bytes,
            space_check_interval: config.space_check_interval_secs,
            queue_depth: config.capture_queue_depth,
            space,
            clock,
            meter: Arc::new(LevelMeter::new()),
            events,
            take: None,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn is_capturing(&self) -> bool {
        self.state == RecorderState::Capturing
    }

    /// Track of the take in progress
    pub fn recording_track(&self) -> Option<usize> {
        self.take.as_ref().map(|t| t.request.track)
    }

    pub fn meter(&self) -> Arc<LevelMeter> {
        Arc::clone(&self.meter)
    }

    pub fn takes_dir(&self) -> &Path {
        &self.takes_dir
    }

    /// Install the always-on metering tap
    pub fn install_meter(&mut self, engine: &mut Engine, handle: EngineHandle) -> Result<()> {
        engine
            .input(handle)?
            .install_tap(Box::new(MeterTap::new(Arc::clone(&self.meter))))
    }

    /// Start a take
    ///
    /// Free space is checked before anything is installed; when it is below
    /// the floor the call fails with `InsufficientSpace` and the input device
    /// is left untouched.
    pub fn start(&mut self, engine: &mut Engine, handle: EngineHandle, request: TakeRequest) -> Result<()> {
        if self.state != RecorderState::Idle {
            return Err(FourtrackError::InvalidState {
                expected: "idle",
                actual: self.state.to_string(),
            });
        }

        fs::create_dir_all(&self.takes_dir)?;
        let available = self.space.available_bytes(&self.takes_dir)?;
        if available < self.min_free_bytes {
            return Err(FourtrackError::InsufficientSpace {
                available_bytes: available,
                required_bytes: self.min_free_bytes,
            });
        }

        // Route latency can change between takes
        let latency = engine.output(handle)?.round_trip_latency();
        let format = engine.input(handle)?.format();
        if format.sample_rate == 0 || format.channels == 0 {
            return Err(FourtrackError::UnsupportedFormat {
                format: format!("{} Hz / {} channel input", format.sample_rate, format.channels),
            });
        }

        self.state = RecorderState::Armed;
        let armed_at = self.clock.now_secs();

        let path = self
            .takes_dir
            .join(format!("take-{}-track{}.wav", Uuid::new_v4(), request.track + 1));
        let spec = SampleEncoding::Float32.spec(format.channels, format.sample_rate);
        let writer = match WavWriter::create(&path, spec) {
            Ok(writer) => writer,
            Err(e) => {
                self.state = RecorderState::Idle;
                return Err(e.into());
            }
        };

        let (queue_tx, queue_rx) = bounded(self.queue_depth);
        let BufferPool { free_tx, free_rx } = BufferPool::new(self.queue_depth);
        let check_every = secs_to_frames(self.space_check_interval, format.sample_rate).max(1) as u64;
        let take_writer = TakeWriter {
            writer,
            channels: format.channels as usize,
            frames_written: 0,
            check_every,
            next_check: check_every,
            takes_dir: self.takes_dir.clone(),
            min_free_bytes: self.min_free_bytes,
            space: Arc::clone(&self.space),
            events: self.events.clone(),
            halted: false,
        };
        let spawned = thread::Builder::new()
            .name("take-writer".to_string())
            .spawn(move || take_writer.run(queue_rx, free_tx));
        let worker = match spawned {
            Ok(worker) => worker,
            Err(e) => {
                let _ = fs::remove_file(&path);
                self.state = RecorderState::Idle;
                return Err(e.into());
            }
        };

        let stats = Arc::new(CaptureStats::new());
        let tap = TakeTap {
            meter: Arc::clone(&self.meter),
            queue: queue_tx,
            free: free_rx,
            stats: Arc::clone(&stats),
            clock: Arc::clone(&self.clock),
            seen_first: false,
        };

        if let Err(e) = engine.input(handle).and_then(|input| input.install_tap(Box::new(tap))) {
            // The tap (and with it the queue sender) is gone, so the worker exits
            let _ = worker.join();
            let _ = fs::remove_file(&path);
            self.state = RecorderState::Idle;
            return Err(e);
        }

        info!(
            track = request.track,
            playhead = request.playhead,
            overdub = request.overdub,
            latency,
            path = %path.display(),
            "recording started"
        );
        self.take = Some(ActiveTake {
            request,
            path,
            latency,
            sample_rate: format.sample_rate,
            armed_at,
            stats,
            worker,
        });
        self.state = RecorderState::Capturing;
        Ok(())
    }

    /// Stop the take, restore metering and place the result
    ///
    /// Returns `None` when nothing usable was captured.
    pub fn stop(&mut self, engine: &mut Engine, handle: EngineHandle) -> Result<Option<FinishedTake>> {
        let Some(take) = self.take.take() else {
            return Err(FourtrackError::InvalidState {
                expected: "capturing",
                actual: self.state.to_string(),
            });
        };
        self.state = RecorderState::Finalizing;

        match engine.input(handle) {
            Ok(input) => {
                drop(input.remove_tap());
                if let Err(e) = input.install_tap(Box::new(MeterTap::new(Arc::clone(&self.meter)))) {
                    warn!(error = %e, "could not restore metering tap");
                }
            }
            // A rebuilt engine already dropped the old device and its tap
            Err(e) => warn!(error = %e, "input unavailable while stopping take"),
        }

        let result = self.finish(take);
        self.state = RecorderState::Idle;
        result
    }

    fn finish(&mut self, take: ActiveTake) -> Result<Option<FinishedTake>> {
        let written = match take.worker.join() {
            Ok(result) => result?,
            Err(_) => {
                return Err(FourtrackError::WriteFailed {
                    path: take.path,
                    reason: "take writer thread panicked".to_string(),
                })
            }
        };

        let dropped = take.stats.dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            warn!(dropped, "capture queue overflowed during take");
            let _ = self.events.send(EngineEvent::CaptureOverrun {
                dropped_buffers: dropped,
            });
        }
        if let Some(first) = take.stats.first_buffer_at() {
            debug!(
                delay_ms = (first - take.armed_at) * 1000.0,
                buffers = take.stats.buffers.load(Ordering::Relaxed),
                "first capture buffer arrived after arm"
            );
        }

        let placement = compensate(take.request.playhead, take.latency, take.request.overdub);
        let trim_frames = secs_to_frames(placement.trim_secs, take.sample_rate).max(0) as u64;
        if written <= trim_frames {
            fs::remove_file(&take.path)?;
            info!(track = take.request.track, frames = written, "take discarded: no usable audio");
            return Ok(None);
        }

        let frames = if trim_frames > 0 {
            trim_take_front(&take.path, trim_frames)?
        } else {
            written
        };
        let duration = frames as f64 / take.sample_rate as f64;

        let file_name = take
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut region = Region::new(SourceHandle::new(file_name), placement.start_time, duration);
        region.file_duration = Some(duration);

        info!(
            track = take.request.track,
            start = placement.start_time,
            trimmed = placement.trim_secs,
            frames,
            "recording stopped"
        );
        Ok(Some(FinishedTake {
            track: take.request.track,
            region,
            placement,
            path: take.path,
            dropped_buffers: dropped,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{FakeInput, FakeOutput, FixedSpace, ManualClock};
    use approx::assert_relative_eq;
    use test_case::test_case;

    #[test_case(5.0, 0.15, true, 4.85, 0.0 ; "overdub shifts earlier")]
    #[test_case(5.0, 0.15, false, 5.0, 0.0 ; "first take is not compensated")]
    #[test_case(0.05, 0.15, true, 0.0, 0.10 ; "overdub near zero trims instead")]
    #[test_case(0.15, 0.15, true, 0.0, 0.0 ; "exact boundary needs no trim")]
    fn test_compensate(start: f64, latency: f64, overdub: bool, expected_start: f64, expected_trim: f64) {
        let placement = compensate(start, latency, overdub);
        assert_relative_eq!(placement.start_time, expected_start, epsilon = 1e-9);
        assert_relative_eq!(placement.trim_secs, expected_trim, epsilon = 1e-9);
    }

    #[test]
    fn test_meter_tracks_last_buffer() {
        let meter = LevelMeter::new();
        meter.update(&[0.5, -0.25]);
        assert_eq!(meter.peak(), 0.5);
        assert!(meter.rms() > 0.0);
        meter.reset();
        assert_eq!(meter.peak(), 0.0);
    }

    #[test]
    fn test_take_is_written_and_meter_restored() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            takes_dir: dir.path().to_path_buf(),
            ..EngineConfig::default()
        };
        let input = FakeInput::new(1000, 1);
        let input_monitor = input.monitor();
        let mut engine = Engine::new(Box::new(FakeOutput::new(1000)), Some(Box::new(input)));
        let handle = engine.handle();
        let (events, _rx) = crate::engine::events::event_channel();
        let mut recorder = Recorder::new(
            &config,
            Arc::new(FixedSpace::new(u64::MAX)),
            Arc::new(ManualClock::new()),
            events,
        );

        recorder
            .start(
                &mut engine,
                handle,
                TakeRequest {
                    track: 0,
                    playhead: 2.0,
                    overdub: false,
                },
            )
            .unwrap();
        assert_eq!(recorder.state(), RecorderState::Capturing);
        for _ in 0..4 {
            assert!(input_monitor.push(&[0.5; 250]));
        }

        let take = recorder.stop(&mut engine, handle).unwrap().unwrap();
        assert_eq!(recorder.state(), RecorderState::Idle);
        assert_relative_eq!(take.region.start_time, 2.0);
        assert_relative_eq!(take.region.duration, 1.0);
        assert!(take.path.exists());
        // Metering tap is back in place
        assert!(input_monitor.has_tap());
        assert_eq!(input_monitor.installs(), 2);
    }

    fn pooled_tap(buffers: usize) -> (TakeTap, Receiver<Vec<f32>>, Sender<Vec<f32>>) {
        let (queue_tx, queue_rx) = bounded(buffers);
        let pool = BufferPool::new(buffers);
        let tap = TakeTap {
            meter: Arc::new(LevelMeter::new()),
            queue: queue_tx,
            free: pool.free_rx,
            stats: Arc::new(CaptureStats::new()),
            clock: Arc::new(ManualClock::new()),
            seen_first: false,
        };
        (tap, queue_rx, pool.free_tx)
    }

    #[test]
    fn test_tap_reuses_pooled_buffers() {
        let (mut tap, queue, recycle) = pooled_tap(1);
        tap.on_buffer(&[0.25; 128]);
        let first = queue.try_recv().unwrap();
        assert_eq!(first, vec![0.25; 128]);
        assert!(first.capacity() >= POOL_BUFFER_SAMPLES);
        let ptr = first.as_ptr();

        recycle.send(first).unwrap();
        tap.on_buffer(&[0.5; 64]);
        let second = queue.try_recv().unwrap();
        assert_eq!(second, vec![0.5; 64]);
        assert_eq!(second.as_ptr(), ptr);
    }

    #[test]
    fn test_tap_drops_when_pool_is_exhausted() {
        let (mut tap, queue, _recycle) = pooled_tap(2);
        for _ in 0..3 {
            tap.on_buffer(&[0.1; 32]);
        }
        assert_eq!(queue.try_iter().count(), 2);
        assert_eq!(tap.stats.buffers.load(Ordering::Relaxed), 3);
        assert_eq!(tap.stats.dropped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_trim_take_front() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.wav");
        let samples: Vec<f32> = (0..100).map(|i| i as f32).collect();
        crate::engine::io::write_wav(
            &crate::engine::buffer::AudioBuffer::mono(samples, 1000),
            &path,
            SampleEncoding::Float32,
        )
        .unwrap();

        assert_eq!(trim_take_front(&path, 10).unwrap(), 90);
        let back = crate::engine::io::read_wav(&path).unwrap();
        assert_eq!(back.len(), 90);
        assert_eq!(back.channel(0)[0], 10.0);
    }
}
