//! Transport: the coordinating context
//!
//! Owns the session store, the timeline state and the engine, and is the
//! only place where playback, recording and loop wraps are started or
//! stopped. Hosts call [`Transport::tick`] regularly (every UI frame or
//! so); the tick advances the playhead from the clock anchor, wraps loops,
//! dispatches scheduling passes and reacts to worker events.

use std::fmt;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::engine::clock::{secs_to_frames, ClockAnchor, WallClock};
use crate::engine::device::{Engine, EngineHandle, InputDevice, OutputDevice};
use crate::engine::events::{event_channel, EngineEvent, Interruption};
use crate::engine::prerender::{PrerenderCache, RegionPrerenderer};
use crate::engine::recorder::{LevelMeter, Recorder, RecorderState, TakeRequest};
use crate::engine::scheduler::{PassReport, PlaybackScheduler, PlayerState};
use crate::engine::source::SourceResolver;
use crate::engine::space::SpaceProbe;
use crate::error::{FourtrackError, Result};
use crate::fx::{MainBus, NodeFactory, TrackChain};
use crate::model::{ChangeKind, RegionId, Session, SessionChange, SessionStore, TimelineState, TRACK_COUNT};

/// Transport states representing the current playback mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    /// Nothing running (default state)
    #[default]
    Stopped,
    /// Audio is actively playing
    Playing,
    /// A take is being captured, with or without other tracks playing
    Recording,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Stopped => write!(f, "Stopped"),
            TransportState::Playing => write!(f, "Playing"),
            TransportState::Recording => write!(f, "Recording"),
        }
    }
}

/// External collaborators the transport depends on
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn SourceResolver>,
    pub space: Arc<dyn SpaceProbe>,
    pub clock: Arc<dyn WallClock>,
    /// Builds the live track chains and main bus
    pub nodes: Arc<dyn NodeFactory>,
}

/// A scheduling pass captured on the coordinating context
///
/// Carries the scheduler generation it was captured at; if the scheduler
/// has been reset since (loop wrap, seek, stop), the anchor and timeline it
/// holds are out of date and the pass is dropped.
struct PassJob {
    generation: u64,
    handle: EngineHandle,
    session: Arc<Session>,
    cache: Arc<PrerenderCache>,
    anchor: ClockAnchor,
    timeline: TimelineState,
}

impl PassJob {
    fn run(&self, scheduler: &Mutex<PlaybackScheduler>, engine: &Mutex<Engine>) -> Result<Option<PassReport>> {
        let mut scheduler = scheduler.lock();
        if scheduler.generation() != self.generation {
            debug!(
                captured = self.generation,
                current = scheduler.generation(),
                "dropping stale scheduling pass"
            );
            return Ok(None);
        }
        let mut engine = engine.lock();
        scheduler
            .pass(
                &mut engine,
                self.handle,
                &self.session,
                &self.cache,
                &self.anchor,
                &self.timeline,
            )
            .map(Some)
    }
}

pub struct Transport {
    config: EngineConfig,
    store: SessionStore,
    timeline: TimelineState,

    engine: Arc<Mutex<Engine>>,
    handle: EngineHandle,
    scheduler: Arc<Mutex<PlaybackScheduler>>,
    prerenderer: RegionPrerenderer,
    cache: Arc<PrerenderCache>,
    /// Session snapshot the cache was rendered from
    rendered: Arc<Session>,
    anchor: Option<ClockAnchor>,
    recorder: Recorder,
    clock: Arc<dyn WallClock>,
    nodes: Arc<dyn NodeFactory>,
    /// Store notifications, for effect edits made while playing
    edits: Receiver<SessionChange>,

    pass_in_progress: Arc<AtomicBool>,
    /// A loop-wrap pass found the previous pass still running
    pass_pending: bool,
    last_pass_wall: f64,

    interrupted: Option<Interruption>,
    worker_events: Receiver<EngineEvent>,
    listeners: Vec<Sender<EngineEvent>>,
}

impl Transport {
    /// Create a transport around a session store and its devices
    ///
    /// # Arguments
    /// * `config` - Engine settings, validated here
    /// * `store` - Session owner; persistence is configured on the store
    /// * `output` - Output device
    /// * `input` - Input device, if recording is possible
    /// * `collaborators` - Source resolver, free-space probe, wall clock and
    ///   effect node factory
    pub fn new(
        config: EngineConfig,
        mut store: SessionStore,
        output: Box<dyn OutputDevice>,
        input: Option<Box<dyn InputDevice>>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        config.validate()?;

        let (events_tx, worker_events) = event_channel();
        let mut engine = Engine::new(output, input);
        let handle = engine.handle();
        let mut recorder = Recorder::new(
            &config,
            collaborators.space,
            Arc::clone(&collaborators.clock),
            events_tx,
        );
        if engine.input(handle).is_ok() {
            recorder.install_meter(&mut engine, handle)?;
        }

        let rendered = store.snapshot();
        let edits = store.subscribe();
        Ok(Self {
            scheduler: Arc::new(Mutex::new(PlaybackScheduler::new(&config))),
            prerenderer: RegionPrerenderer::new(collaborators.resolver),
            cache: Arc::new(PrerenderCache::new(config.sample_rate)),
            rendered,
            config,
            store,
            timeline: TimelineState::default(),
            engine: Arc::new(Mutex::new(engine)),
            handle,
            anchor: None,
            recorder,
            clock: collaborators.clock,
            nodes: collaborators.nodes,
            edits,
            pass_in_progress: Arc::new(AtomicBool::new(false)),
            pass_pending: false,
            last_pass_wall: 0.0,
            interrupted: None,
            worker_events,
            listeners: Vec::new(),
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> TransportState {
        if self.timeline.is_recording {
            TransportState::Recording
        } else if self.timeline.is_playing {
            TransportState::Playing
        } else {
            TransportState::Stopped
        }
    }

    pub fn timeline(&self) -> &TimelineState {
        &self.timeline
    }

    pub fn session(&self) -> &Session {
        self.store.session()
    }

    /// Session edits go through the store
    pub fn store_mut(&mut self) -> &mut SessionStore {
        &mut self.store
    }

    pub fn anchor(&self) -> Option<ClockAnchor> {
        self.anchor
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle
    }

    pub fn recorder_state(&self) -> RecorderState {
        self.recorder.state()
    }

    pub fn player_state(&self, track: usize) -> PlayerState {
        self.scheduler.lock().player_state(track)
    }

    /// Input level meter, live whether or not a take is running
    pub fn meter(&self) -> Arc<LevelMeter> {
        self.recorder.meter()
    }

    pub fn interruption(&self) -> Option<&Interruption> {
        self.interrupted.as_ref()
    }

    /// A background scheduling pass is still running
    pub fn is_pass_in_progress(&self) -> bool {
        self.pass_in_progress.load(Ordering::Acquire)
    }

    /// Receive every engine event from now on
    pub fn subscribe(&mut self) -> Receiver<EngineEvent> {
        let (tx, rx) = event_channel();
        self.listeners.push(tx);
        rx
    }

    // ========================================================================
    // Playback
    // ========================================================================

    /// Start playback from the playhead
    ///
    /// In loop mode a playhead outside the loop jumps to the loop start.
    pub fn play(&mut self) -> Result<()> {
        self.check_not_interrupted()?;
        if self.timeline.is_playing {
            return Ok(());
        }
        if let Some(range) = self.timeline.active_loop() {
            if self.timeline.playhead < range.start || self.timeline.playhead >= range.end {
                self.timeline.playhead = range.start;
            }
        }
        self.start_playback()
    }

    fn start_playback(&mut self) -> Result<()> {
        let sample_rate = self.engine.lock().output(self.handle)?.format().sample_rate;

        // Re-rendered in full for every playback session
        let session = self.store.snapshot();
        self.cache = Arc::new(self.prerenderer.render_session(&session, sample_rate));
        self.install_graph(&session, sample_rate)?;
        self.rendered = session;

        let sample_time = {
            let mut engine = self.engine.lock();
            let output = engine.output(self.handle)?;
            if !output.is_running() {
                output.start()?;
            }
            output.current_sample_time().ok_or(FourtrackError::DeviceNotRunning)?
        };

        // Anchored after the device is running, not when play was requested
        let now = self.clock.now_secs();
        let anchor = ClockAnchor::new(sample_time, now, self.timeline.playhead, sample_rate);
        self.anchor = Some(anchor);
        self.scheduler.lock().reset(self.timeline.playhead);
        self.timeline.is_playing = true;
        info!(
            playhead = self.timeline.playhead,
            sample_time,
            sample_rate,
            "playback started"
        );

        self.run_pass()?;
        self.last_pass_wall = now;
        Ok(())
    }

    /// Build every track chain and the main bus and hand them to the output
    fn install_graph(&self, session: &Session, sample_rate: u32) -> Result<()> {
        let mut engine = self.engine.lock();
        let output = engine.output(self.handle)?;
        for (index, track) in session.tracks.iter().enumerate() {
            let chain = TrackChain::build(index, &track.fx, self.nodes.as_ref(), sample_rate)?;
            output.set_track_chain(index, chain)?;
        }
        output.set_main_bus(MainBus::build(self.nodes.as_ref(), sample_rate)?)
    }

    /// Rebuild one track's chain from the store after an effect edit
    fn reconfigure_track(&self, track: usize) -> Result<()> {
        let fx = self.store.session().track(track)?.fx.clone();
        let chain = TrackChain::build(track, &fx, self.nodes.as_ref(), self.cache.sample_rate())?;
        self.engine.lock().output(self.handle)?.set_track_chain(track, chain)?;
        debug!(track, "track effects updated");
        Ok(())
    }

    fn apply_session_edits(&mut self) {
        let mut touched = [false; TRACK_COUNT];
        for change in self.edits.try_iter() {
            match change.kind {
                ChangeKind::TrackFx { track } if track < TRACK_COUNT => touched[track] = true,
                ChangeKind::Replaced => touched = [true; TRACK_COUNT],
                _ => {}
            }
        }
        // Chains are installed in full when playback starts
        if !self.timeline.is_playing {
            return;
        }
        for track in (0..TRACK_COUNT).filter(|&t| touched[t]) {
            if let Err(e) = self.reconfigure_track(track) {
                warn!(track, error = %e, "could not apply effect change");
            }
        }
    }

    /// Stop playback and any take in progress
    pub fn stop(&mut self) -> Result<()> {
        let take_result = if self.recorder.is_capturing() {
            self.finish_recording().map(|_| ())
        } else {
            Ok(())
        };

        if self.timeline.is_playing {
            self.update_playhead();
            {
                let mut scheduler = self.scheduler.lock();
                let mut engine = self.engine.lock();
                match engine.output(self.handle) {
                    Ok(output) => {
                        for track in 0..TRACK_COUNT {
                            output.clear_track(track);
                        }
                        output.stop();
                    }
                    Err(e) => warn!(error = %e, "output unavailable while stopping"),
                }
                scheduler.reset(self.timeline.playhead);
            }
            self.timeline.is_playing = false;
            self.anchor = None;
            self.pass_pending = false;
            info!(playhead = self.timeline.playhead, "playback stopped");
            self.emit(EngineEvent::PlaybackStopped {
                playhead: self.timeline.playhead,
            });
        }

        take_result
    }

    /// Move the playhead
    ///
    /// While playing, everything queued is dropped and playback re-anchors
    /// at the new position. Refused while recording.
    pub fn seek(&mut self, position: f64) -> Result<()> {
        if self.timeline.is_recording {
            return Err(FourtrackError::RecordingActive);
        }
        let max = self.store.session().max_duration;
        self.timeline.seek(position, max);
        if self.timeline.is_playing {
            self.reanchor()?;
        }
        Ok(())
    }

    /// Configure the loop range
    pub fn set_loop(&mut self, enabled: bool, start: f64, end: f64) -> Result<()> {
        let max = self.store.session().max_duration;
        if enabled && !(start >= 0.0 && start < end && end <= max) {
            return Err(FourtrackError::InvalidState {
                expected: "0 <= loop start < loop end <= session length",
                actual: format!("{:.3}..{:.3}", start, end),
            });
        }
        self.timeline.is_loop_mode = enabled;
        self.timeline.loop_start = start;
        self.timeline.loop_end = end;

        if self.timeline.is_playing && !self.timeline.is_recording {
            self.update_playhead();
            if let Some(range) = self.timeline.active_loop() {
                if self.timeline.playhead < range.start || self.timeline.playhead >= range.end {
                    self.timeline.playhead = range.start;
                }
            }
            self.reanchor()?;
        }
        Ok(())
    }

    /// Drop queued audio and anchor again at the current playhead
    fn reanchor(&mut self) -> Result<()> {
        let Some(anchor) = self.anchor else {
            return Ok(());
        };
        let margin = secs_to_frames(self.config.schedule_lead_secs, anchor.sample_rate);
        let now = self.clock.now_secs();
        {
            // Clear and reset under one scheduler lock so no pass lands between them
            let mut scheduler = self.scheduler.lock();
            let mut engine = self.engine.lock();
            let output = engine.output(self.handle)?;
            for track in 0..TRACK_COUNT {
                output.clear_track(track);
            }
            let device_now = output.current_sample_time().ok_or(FourtrackError::DeviceNotRunning)?;
            self.anchor = Some(anchor.rewound(self.timeline.playhead, now, device_now, margin));
            scheduler.reset(self.timeline.playhead);
        }
        self.run_pass()?;
        self.last_pass_wall = now;
        Ok(())
    }

    // ========================================================================
    // Recording
    // ========================================================================

    /// Start recording on the armed track
    ///
    /// The playhead is captured before anything else happens; it is the
    /// position the take is placed against. Playback starts too if it is
    /// not already running, so an overdub hears the other tracks.
    pub fn record(&mut self) -> Result<()> {
        self.check_not_interrupted()?;
        if self.recorder.state() != RecorderState::Idle {
            return Err(FourtrackError::InvalidState {
                expected: "recorder idle",
                actual: self.recorder.state().to_string(),
            });
        }
        let track = self.store.session().armed_track().ok_or_else(|| FourtrackError::InvalidState {
            expected: "an armed track",
            actual: "no track armed".to_string(),
        })?;

        self.update_playhead();
        let request = TakeRequest {
            track,
            playhead: self.timeline.playhead,
            overdub: self.store.session().other_tracks_have_audio(track),
        };

        {
            let mut engine = self.engine.lock();
            self.recorder.start(&mut engine, self.handle, request)?;
        }
        self.store.set_recording_active(true);
        self.timeline.is_recording = true;

        self.scheduler.lock().exclude_track(Some(track));

        if self.timeline.is_playing {
            let mut engine = self.engine.lock();
            engine.output(self.handle)?.clear_track(track);
        } else if let Err(e) = self.start_playback() {
            warn!(error = %e, "playback failed to start; abandoning take");
            self.abandon_take();
            return Err(e);
        }

        info!(track, playhead = request.playhead, overdub = request.overdub, "recording");
        Ok(())
    }

    /// Stop the take and append it to its track; playback keeps running
    ///
    /// Returns the new region, or `None` when nothing usable was captured.
    pub fn stop_recording(&mut self) -> Result<Option<RegionId>> {
        if !self.recorder.is_capturing() {
            return Err(FourtrackError::InvalidState {
                expected: "capturing",
                actual: self.recorder.state().to_string(),
            });
        }
        self.finish_recording()
    }

    fn finish_recording(&mut self) -> Result<Option<RegionId>> {
        let track = self.recorder.recording_track().unwrap_or_default();
        let result = {
            let mut engine = self.engine.lock();
            self.recorder.stop(&mut engine, self.handle)
        };
        self.store.set_recording_active(false);
        self.timeline.is_recording = false;
        if self.timeline.is_playing {
            // The track's queue was cleared for the take; pick it up at the playhead
            self.update_playhead();
            self.scheduler.lock().readmit_track(track, self.timeline.playhead);
            self.pass_pending = true;
        } else {
            self.scheduler.lock().exclude_track(None);
        }

        let Some(take) = result? else {
            self.emit(EngineEvent::RecordingStopped {
                track,
                region: None,
                start_time: 0.0,
                trimmed_secs: 0.0,
            });
            return Ok(None);
        };

        let id = self.store.append_recorded_region(take.track, take.region)?;
        self.emit(EngineEvent::RecordingStopped {
            track: take.track,
            region: Some(id),
            start_time: take.placement.start_time,
            trimmed_secs: take.placement.trim_secs,
        });
        Ok(Some(id))
    }

    fn abandon_take(&mut self) {
        let result = {
            let mut engine = self.engine.lock();
            self.recorder.stop(&mut engine, self.handle)
        };
        self.store.set_recording_active(false);
        self.timeline.is_recording = false;
        self.scheduler.lock().exclude_track(None);
        if let Ok(Some(take)) = result {
            if let Err(e) = fs::remove_file(&take.path) {
                warn!(error = %e, path = %take.path.display(), "could not remove abandoned take");
            }
        }
    }

    // ========================================================================
    // Interruptions and device changes
    // ========================================================================

    /// React to a device disconnect or OS interruption
    ///
    /// Any take is stopped and kept, playback is stopped (not paused) and a
    /// notice is emitted. Playing and recording are refused until
    /// [`Transport::end_interruption`] or [`Transport::rebuild_engine`].
    pub fn handle_interruption(&mut self, interruption: Interruption) -> Result<()> {
        warn!(%interruption, "audio interrupted");
        let was_recording = self.recorder.is_capturing();
        let result = self.stop();

        let message = if was_recording {
            format!("{}: recording stopped and the take was kept", interruption)
        } else {
            format!("{}: playback stopped", interruption)
        };
        self.emit(EngineEvent::Notice { message });
        self.interrupted = Some(interruption);
        result
    }

    /// The OS interruption is over
    pub fn end_interruption(&mut self) {
        if let Some(interruption) = self.interrupted.take() {
            info!(%interruption, "interruption ended");
        }
    }

    /// Swap in new devices, e.g. after a route change
    ///
    /// Outstanding handles become stale. Playback and recording are stopped
    /// first.
    pub fn rebuild_engine(&mut self, output: Box<dyn OutputDevice>, input: Option<Box<dyn InputDevice>>) -> Result<()> {
        self.stop()?;
        let mut engine = self.engine.lock();
        self.handle = engine.rebuild(output, input);
        if engine.input(self.handle).is_ok() {
            self.recorder.install_meter(&mut engine, self.handle)?;
        }
        drop(engine);
        self.interrupted = None;
        info!("engine rebuilt");
        Ok(())
    }

    fn check_not_interrupted(&self) -> Result<()> {
        match &self.interrupted {
            Some(interruption) => Err(FourtrackError::Interrupted {
                reason: interruption.to_string(),
            }),
            None => Ok(()),
        }
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Advance the transport
    pub fn tick(&mut self) -> Result<()> {
        self.handle_worker_events()?;
        self.apply_session_edits();

        if self.timeline.is_playing {
            let now = self.clock.now_secs();
            self.update_playhead();

            let wrap = if self.timeline.is_recording {
                // Takes run straight through the loop end
                None
            } else {
                self.timeline
                    .active_loop()
                    .filter(|range| self.timeline.playhead >= range.end)
            };

            if let Some(range) = wrap {
                self.wrap_loop(range.start, now)?;
            } else if self.timeline.playhead >= self.store.session().max_duration {
                info!("reached the end of the session");
                self.stop()?;
            } else if self.pass_pending || now - self.last_pass_wall >= self.config.reschedule_interval_secs {
                self.dispatch_pass(now);
            }

            if self.timeline.is_playing {
                let device_now = self
                    .engine
                    .lock()
                    .output(self.handle)
                    .ok()
                    .and_then(|o| o.current_sample_time());
                if let Some(sample_time) = device_now {
                    self.scheduler.lock().refresh_states(sample_time);
                }
            }
        }

        if let Err(e) = self.store.flush_if_due(Instant::now()) {
            warn!(error = %e, "session persistence failed");
        }
        Ok(())
    }

    fn update_playhead(&mut self) {
        if let Some(anchor) = self.anchor {
            let max = self.store.session().max_duration;
            self.timeline.playhead = anchor.timeline_now(self.clock.now_secs()).min(max);
        }
    }

    fn wrap_loop(&mut self, loop_start: f64, now: f64) -> Result<()> {
        let Some(anchor) = self.anchor else {
            return Ok(());
        };
        let margin = secs_to_frames(self.config.schedule_lead_secs, anchor.sample_rate);
        let device_now = {
            let mut scheduler = self.scheduler.lock();
            let device_now = self
                .engine
                .lock()
                .output(self.handle)?
                .current_sample_time()
                .ok_or(FourtrackError::DeviceNotRunning)?;
            self.anchor = Some(anchor.rewound(loop_start, now, device_now, margin));
            self.timeline.playhead = loop_start;
            scheduler.reset(loop_start);
            device_now
        };
        debug!(loop_start, device_now, "loop wrapped");
        self.emit(EngineEvent::LoopWrapped { loop_start });

        self.pass_pending = true;
        self.dispatch_pass(now);
        Ok(())
    }

    fn handle_worker_events(&mut self) -> Result<()> {
        let events: Vec<EngineEvent> = self.worker_events.try_iter().collect();
        for event in events {
            if let EngineEvent::DiskSpaceExhausted { available_bytes } = event {
                if self.recorder.is_capturing() {
                    warn!(available_bytes, "disk full; stopping take");
                    self.finish_recording()?;
                    self.emit(EngineEvent::Notice {
                        message: "Storage is full. Recording stopped and the take was kept.".to_string(),
                    });
                }
            }
            self.emit(event);
        }
        Ok(())
    }

    fn emit(&mut self, event: EngineEvent) {
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }

    // ========================================================================
    // Scheduling passes
    // ========================================================================

    /// Run a pass on the coordinating context
    fn run_pass(&mut self) -> Result<PassReport> {
        let anchor = self.anchor.ok_or(FourtrackError::DeviceNotRunning)?;
        let mut scheduler = self.scheduler.lock();
        let mut engine = self.engine.lock();
        scheduler.pass(
            &mut engine,
            self.handle,
            &self.rendered,
            &self.cache,
            &anchor,
            &self.timeline,
        )
    }

    fn pass_job(&self) -> Option<PassJob> {
        Some(PassJob {
            generation: self.scheduler.lock().generation(),
            handle: self.handle,
            session: Arc::clone(&self.rendered),
            cache: Arc::clone(&self.cache),
            anchor: self.anchor?,
            timeline: self.timeline.clone(),
        })
    }

    /// Run a pass in the background, or skip it if one is still running
    fn dispatch_pass(&mut self, now: f64) {
        if !self.config.background_passes {
            if let Err(e) = self.run_pass() {
                warn!(error = %e, "scheduling pass failed");
            }
            self.pass_pending = false;
            self.last_pass_wall = now;
            return;
        }

        if self.pass_in_progress.swap(true, Ordering::AcqRel) {
            debug!("previous scheduling pass still running; skipping");
            return;
        }
        let Some(job) = self.pass_job() else {
            self.pass_in_progress.store(false, Ordering::Release);
            return;
        };

        let in_progress = Arc::clone(&self.pass_in_progress);
        let scheduler = Arc::clone(&self.scheduler);
        let engine = Arc::clone(&self.engine);

        let spawned = thread::Builder::new()
            .name("schedule-pass".to_string())
            .spawn(move || {
                if let Err(e) = job.run(&scheduler, &engine) {
                    warn!(error = %e, "scheduling pass failed");
                }
                in_progress.store(false, Ordering::Release);
            });

        match spawned {
            Ok(_) => {
                self.pass_pending = false;
                self.last_pass_wall = now;
            }
            Err(e) => {
                warn!(error = %e, "could not spawn scheduling pass");
                self.pass_in_progress.store(false, Ordering::Release);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::engine::buffer::{db_to_linear, AudioBuffer};
    use crate::engine::testing::{FakeInput, FakeOutput, FixedSpace, ManualClock, MemoryResolver, OutputMonitor};
    use crate::fx::StockNodes;
    use crate::model::{Region, SourceHandle, TrackFx};
    use approx::assert_relative_eq;

    const SR: u32 = 1000;

    struct Rig {
        transport: Transport,
        output: OutputMonitor,
        clock: Arc<ManualClock>,
        _dir: tempfile::TempDir,
    }

    fn rig(session: Session) -> Rig {
        rig_with(session, false)
    }

    fn rig_with(session: Session, background_passes: bool) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let resolver = MemoryResolver::new();
        resolver.insert("a.wav", AudioBuffer::mono(vec![0.5; 10 * SR as usize], SR));
        let clock = Arc::new(ManualClock::new());
        let output = FakeOutput::new(SR).starting_at(500);
        let monitor = output.monitor();
        let config = EngineConfig {
            sample_rate: SR,
            lookahead_secs: 4.0,
            schedule_lead_secs: 0.05,
            reschedule_interval_secs: 1.0,
            background_passes,
            min_free_bytes: 0,
            takes_dir: dir.path().join("takes"),
            ..EngineConfig::default()
        };
        let transport = Transport::new(
            config,
            SessionStore::new(session),
            Box::new(output),
            Some(Box::new(FakeInput::new(SR, 1))),
            Collaborators {
                resolver: Arc::new(resolver),
                space: Arc::new(FixedSpace::new(u64::MAX)),
                clock: clock.clone(),
                nodes: Arc::new(StockNodes),
            },
        )
        .unwrap();
        Rig {
            transport,
            output: monitor,
            clock,
            _dir: dir,
        }
    }

    fn wait_for_pass(transport: &Transport) {
        for _ in 0..2000 {
            if !transport.is_pass_in_progress() {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("background scheduling pass never finished");
    }

    fn placements(output: &OutputMonitor, track: usize) -> Vec<(i64, usize)> {
        let mut calls: Vec<(i64, usize)> = output
            .scheduled_on(track)
            .iter()
            .map(|c| (c.at_sample, c.samples.len()))
            .collect();
        calls.sort();
        calls
    }

    fn one_region_session() -> Session {
        let mut session = Session::new("t", 60.0);
        session
            .add_region(0, Region::new(SourceHandle::new("a.wav"), 0.0, 8.0))
            .unwrap();
        session
    }

    #[test]
    fn test_play_anchors_and_schedules() {
        let mut rig = rig(one_region_session());
        rig.transport.play().unwrap();

        assert_eq!(rig.transport.state(), TransportState::Playing);
        let anchor = rig.transport.anchor().unwrap();
        assert_eq!(anchor.sample_time, 500);

        let calls = rig.output.scheduled_on(0);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].at_sample, 550);
        assert_eq!(calls[0].samples.len(), 4000);
    }

    #[test]
    fn test_stop_clears_players_and_reports() {
        let mut rig = rig(one_region_session());
        let events = rig.transport.subscribe();
        rig.transport.play().unwrap();
        rig.clock.advance(1.5);
        rig.transport.stop().unwrap();

        assert_eq!(rig.transport.state(), TransportState::Stopped);
        assert!(!rig.output.is_running());
        assert_eq!(rig.output.cleared().len(), TRACK_COUNT);
        assert_eq!(
            events.try_recv().unwrap(),
            EngineEvent::PlaybackStopped { playhead: 1.5 }
        );
    }

    #[test]
    fn test_record_without_armed_track() {
        let mut rig = rig(Session::new("t", 60.0));
        let err = rig.transport.record().unwrap_err();
        assert!(matches!(err, FourtrackError::InvalidState { .. }));
        assert!(!rig.transport.store_mut().is_recording_active());
    }

    #[test]
    fn test_interruption_blocks_play_until_ended() {
        let mut rig = rig(one_region_session());
        let events = rig.transport.subscribe();
        rig.transport.play().unwrap();
        rig.transport
            .handle_interruption(Interruption::System {
                reason: "incoming call".to_string(),
            })
            .unwrap();

        assert_eq!(rig.transport.state(), TransportState::Stopped);
        let notices: Vec<_> = events
            .try_iter()
            .filter(|e| matches!(e, EngineEvent::Notice { .. }))
            .collect();
        assert_eq!(notices.len(), 1);

        assert!(matches!(
            rig.transport.play(),
            Err(FourtrackError::Interrupted { .. })
        ));
        rig.transport.end_interruption();
        assert!(rig.transport.play().is_ok());
    }

    #[test]
    fn test_seek_reanchors_while_playing() {
        let mut rig = rig(one_region_session());
        rig.transport.play().unwrap();
        rig.transport.seek(3.0).unwrap();
        assert_eq!(rig.transport.anchor().unwrap().playhead, 3.0);
        assert_eq!(rig.transport.timeline().playhead, 3.0);
    }

    #[test]
    fn test_invalid_loop_rejected() {
        let mut rig = rig(one_region_session());
        assert!(rig.transport.set_loop(true, 4.0, 2.0).is_err());
        assert!(rig.transport.set_loop(true, 1.0, 61.0).is_err());
        assert!(rig.transport.set_loop(true, 1.0, 2.0).is_ok());
    }

    #[test]
    fn test_pass_captured_before_loop_wrap_is_dropped() {
        let mut rig = rig_with(one_region_session(), true);
        rig.transport.set_loop(true, 0.0, 3.0).unwrap();
        rig.transport.play().unwrap();
        assert_eq!(placements(&rig.output, 0), vec![(550, 3000)]);

        // A periodic pass captured mid-loop is still in flight at the wrap
        rig.clock.advance(1.5);
        rig.output.advance(1500);
        rig.transport.update_playhead();
        let in_flight = rig.transport.pass_job().unwrap();
        rig.transport.pass_in_progress.store(true, Ordering::Release);

        rig.clock.advance(1.6);
        rig.output.advance(1600);
        rig.transport.tick().unwrap();
        assert_eq!(rig.transport.anchor().unwrap().sample_time, 3650);
        assert!(rig.transport.pass_pending);

        let report = in_flight
            .run(&rig.transport.scheduler, &rig.transport.engine)
            .unwrap();
        assert!(report.is_none());
        rig.transport.pass_in_progress.store(false, Ordering::Release);

        // The retried wrap pass queues the loop against the new anchor
        rig.transport.tick().unwrap();
        wait_for_pass(&rig.transport);
        assert_eq!(placements(&rig.output, 0), vec![(550, 3000), (3700, 3000)]);
    }

    #[test]
    fn test_periodic_pass_skipped_while_one_runs() {
        let mut rig = rig_with(one_region_session(), true);
        rig.transport.play().unwrap();
        rig.transport.pass_in_progress.store(true, Ordering::Release);

        rig.clock.advance(1.5);
        rig.output.advance(1500);
        rig.transport.tick().unwrap();
        assert_eq!(placements(&rig.output, 0), vec![(550, 4000)]);
        assert_eq!(rig.transport.last_pass_wall, 0.0);

        rig.transport.pass_in_progress.store(false, Ordering::Release);
        rig.transport.tick().unwrap();
        wait_for_pass(&rig.transport);
        assert_eq!(placements(&rig.output, 0), vec![(550, 4000), (4550, 1500)]);
    }

    #[test]
    fn test_recorded_track_resumes_at_playhead() {
        let mut session = one_region_session();
        session.arm_track(Some(0)).unwrap();
        let mut rig = rig(session);
        rig.transport.play().unwrap();

        rig.clock.advance(1.0);
        rig.output.advance(1000);
        rig.transport.record().unwrap();
        rig.clock.advance(1.0);
        rig.output.advance(1000);
        rig.transport.stop_recording().unwrap();
        rig.transport.tick().unwrap();

        // Picked up at 2.0 s instead of the 4.0 s high-water mark from before the take
        let calls = placements(&rig.output, 0);
        assert_eq!(calls.last(), Some(&(2550, 4000)));
        assert_eq!(rig.transport.player_state(0), PlayerState::Scheduled);
    }

    #[test]
    fn test_play_installs_track_effects() {
        let mut session = one_region_session();
        let fx = TrackFx {
            pan: -1.0,
            volume_db: -6.0,
            ..TrackFx::default()
        };
        session.set_track_fx(0, fx).unwrap();
        let mut rig = rig(session);
        assert!(rig.output.render_track(0, &[1.0; 4]).is_none());

        rig.transport.play().unwrap();
        assert!(rig.output.has_main_bus());
        for track in 0..TRACK_COUNT {
            assert_eq!(rig.output.chain_installs(track), 1);
        }
        let (left, right) = rig.output.render_track(0, &[1.0; 4]).unwrap();
        assert_relative_eq!(left[0], db_to_linear(-6.0), epsilon = 1e-6);
        assert!(right[0].abs() < 1e-6);
    }

    #[test]
    fn test_effect_edit_while_playing_reaches_output() {
        let mut rig = rig(one_region_session());
        rig.transport.play().unwrap();

        let fx = TrackFx {
            pan: 1.0,
            volume_db: -12.0,
            ..TrackFx::default()
        };
        rig.transport.store_mut().set_track_fx(0, fx).unwrap();
        rig.transport.tick().unwrap();

        assert_eq!(rig.output.chain_installs(0), 2);
        assert_eq!(rig.output.chain_installs(1), 1);
        let (left, right) = rig.output.render_track(0, &[1.0; 4]).unwrap();
        assert!(left[0].abs() < 1e-6);
        assert_relative_eq!(right[0], db_to_linear(-12.0), epsilon = 1e-6);
    }
}
