//! Session store
//!
//! Owns the session on the coordinating context. Every edit bumps a revision,
//! notifies subscribers over channels and marks the session dirty for the
//! debounced persistence collaborator.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, warn};

use super::region::{Region, RegionId};
use super::session::{Session, TrimEdge};
use super::track::TrackFx;
use crate::error::{FourtrackError, Result};

/// What part of the session an edit touched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Regions { track: usize },
    TrackFx { track: usize },
    Mute { track: usize },
    Arm,
    Replaced,
}

/// Notification sent to subscribers after every edit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionChange {
    pub revision: u64,
    pub kind: ChangeKind,
}

/// Persistence collaborator invoked after edits settle
pub trait SessionPersister: Send {
    fn persist(&mut self, session: &Session) -> Result<()>;
}

/// Writes the session as a pretty-printed JSON document
///
/// The file is written next to its destination and renamed into place so a
/// crash mid-write never leaves a truncated document.
#[derive(Debug, Clone)]
pub struct JsonFilePersister {
    path: PathBuf,
}

impl JsonFilePersister {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a session document back
    pub fn load(path: &Path) -> Result<Session> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl SessionPersister for JsonFilePersister {
    fn persist(&mut self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(session)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Mutable owner of the session
pub struct SessionStore {
    session: Arc<Session>,
    revision: u64,
    subscribers: Vec<Sender<SessionChange>>,
    recording_active: bool,
    persister: Option<Box<dyn SessionPersister>>,
    debounce: Duration,
    dirty_since: Option<Instant>,
}

impl SessionStore {
    pub fn new(session: Session) -> Self {
        Self {
            session: Arc::new(session),
            revision: 0,
            subscribers: Vec::new(),
            recording_active: false,
            persister: None,
            debounce: Duration::from_secs(1),
            dirty_since: None,
        }
    }

    /// Attach a persistence collaborator with the given debounce interval
    pub fn with_persister(mut self, persister: Box<dyn SessionPersister>, debounce: Duration) -> Self {
        self.persister = Some(persister);
        self.debounce = debounce;
        self
    }

    /// Cheap immutable snapshot of the current session
    pub fn snapshot(&self) -> Arc<Session> {
        Arc::clone(&self.session)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Receive a notification for every subsequent edit
    pub fn subscribe(&mut self) -> Receiver<SessionChange> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Set while a take is being captured; structural edits are refused
    pub fn set_recording_active(&mut self, active: bool) {
        self.recording_active = active;
    }

    pub fn is_recording_active(&self) -> bool {
        self.recording_active
    }

    /// Replace the whole session (e.g. after loading a document)
    pub fn replace(&mut self, session: Session) {
        self.session = Arc::new(session);
        self.notify(ChangeKind::Replaced);
    }

    /// Apply an edit and notify subscribers on success
    pub fn edit<T>(&mut self, kind: ChangeKind, f: impl FnOnce(&mut Session) -> Result<T>) -> Result<T> {
        let mut draft = (*self.session).clone();
        let value = f(&mut draft)?;
        self.session = Arc::new(draft);
        self.notify(kind);
        Ok(value)
    }

    fn edit_structure<T>(&mut self, track: usize, f: impl FnOnce(&mut Session) -> Result<T>) -> Result<T> {
        if self.recording_active {
            return Err(FourtrackError::RecordingActive);
        }
        self.edit(ChangeKind::Regions { track }, f)
    }

    pub fn add_region(&mut self, track: usize, region: Region) -> Result<RegionId> {
        self.edit_structure(track, |s| s.add_region(track, region))
    }

    pub fn move_region(&mut self, track: usize, id: RegionId, new_start: f64) -> Result<()> {
        self.edit_structure(track, |s| s.move_region(track, id, new_start))
    }

    pub fn trim_region(&mut self, track: usize, id: RegionId, edge: TrimEdge, at: f64) -> Result<()> {
        self.edit_structure(track, |s| s.trim_region(track, id, edge, at))
    }

    pub fn split_region(&mut self, track: usize, id: RegionId, at: f64) -> Result<(RegionId, RegionId)> {
        self.edit_structure(track, |s| s.split_region(track, id, at))
    }

    pub fn duplicate_region(&mut self, track: usize, id: RegionId, at: f64) -> Result<RegionId> {
        self.edit_structure(track, |s| s.duplicate_region(track, id, at))
    }

    pub fn delete_region(&mut self, track: usize, id: RegionId) -> Result<Region> {
        self.edit_structure(track, |s| s.delete_region(track, id))
    }

    pub fn append_recorded_region(&mut self, track: usize, region: Region) -> Result<RegionId> {
        self.edit(ChangeKind::Regions { track }, |s| {
            s.append_recorded_region(track, region)
        })
    }

    pub fn set_track_fx(&mut self, track: usize, fx: TrackFx) -> Result<()> {
        self.edit(ChangeKind::TrackFx { track }, |s| s.set_track_fx(track, fx))
    }

    pub fn set_track_muted(&mut self, track: usize, muted: bool) -> Result<()> {
        self.edit(ChangeKind::Mute { track }, |s| s.set_track_muted(track, muted))
    }

    pub fn arm_track(&mut self, track: Option<usize>) -> Result<()> {
        self.edit(ChangeKind::Arm, |s| s.arm_track(track))
    }

    /// Persist if the session changed and has been quiet for the debounce interval
    ///
    /// Returns true when a write happened.
    pub fn flush_if_due(&mut self, now: Instant) -> Result<bool> {
        let Some(since) = self.dirty_since else {
            return Ok(false);
        };
        if now.saturating_duration_since(since) < self.debounce {
            return Ok(false);
        }
        self.flush()
    }

    /// Persist immediately if there are unsaved changes
    pub fn flush(&mut self) -> Result<bool> {
        if self.dirty_since.is_none() {
            return Ok(false);
        }
        let Some(persister) = self.persister.as_mut() else {
            self.dirty_since = None;
            return Ok(false);
        };
        persister.persist(&self.session)?;
        self.dirty_since = None;
        debug!(revision = self.revision, "session persisted");
        Ok(true)
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.dirty_since.is_some()
    }

    fn notify(&mut self, kind: ChangeKind) {
        self.revision += 1;
        // Every edit restarts the debounce window
        self.dirty_since = Some(Instant::now());

        let change = SessionChange {
            revision: self.revision,
            kind,
        };
        let before = self.subscribers.len();
        self.subscribers.retain(|tx| tx.send(change).is_ok());
        if self.subscribers.len() < before {
            warn!(
                dropped = before - self.subscribers.len(),
                "removed disconnected session subscribers"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::region::SourceHandle;
    use parking_lot::Mutex;
    use tempfile::tempdir;

    #[derive(Clone, Default)]
    struct CountingPersister {
        writes: Arc<Mutex<u32>>,
    }

    impl SessionPersister for CountingPersister {
        fn persist(&mut self, _session: &Session) -> Result<()> {
            *self.writes.lock() += 1;
            Ok(())
        }
    }

    fn region(start: f64) -> Region {
        Region::new(SourceHandle::new("a.wav"), start, 1.0)
    }

    #[test]
    fn test_subscribers_receive_changes() {
        let mut store = SessionStore::new(Session::new("s", 60.0));
        let rx = store.subscribe();

        store.add_region(2, region(0.0)).unwrap();
        store.set_track_muted(1, true).unwrap();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.kind, ChangeKind::Regions { track: 2 });
        assert_eq!(first.revision, 1);
        assert_eq!(rx.try_recv().unwrap().kind, ChangeKind::Mute { track: 1 });
    }

    #[test]
    fn test_failed_edit_does_not_notify_or_mutate() {
        let mut store = SessionStore::new(Session::new("s", 60.0));
        let rx = store.subscribe();
        store.add_region(0, region(0.0)).unwrap();
        let _ = rx.try_recv();

        assert!(store.add_region(0, region(0.5)).is_err());
        assert!(rx.try_recv().is_err());
        assert_eq!(store.session().tracks[0].regions.len(), 1);
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn test_structural_edits_refused_while_recording() {
        let mut store = SessionStore::new(Session::new("s", 60.0));
        let id = store.add_region(0, region(0.0)).unwrap();
        store.set_recording_active(true);

        assert!(matches!(
            store.move_region(0, id, 4.0),
            Err(FourtrackError::RecordingActive)
        ));
        // Non-structural edits still go through
        store.set_track_fx(0, TrackFx::default()).unwrap();
    }

    #[test]
    fn test_snapshots_are_immutable() {
        let mut store = SessionStore::new(Session::new("s", 60.0));
        let before = store.snapshot();
        store.add_region(0, region(0.0)).unwrap();
        assert!(before.tracks[0].regions.is_empty());
        assert_eq!(store.snapshot().tracks[0].regions.len(), 1);
    }

    #[test]
    fn test_persistence_is_debounced() {
        let persister = CountingPersister::default();
        let writes = Arc::clone(&persister.writes);
        let mut store = SessionStore::new(Session::new("s", 60.0))
            .with_persister(Box::new(persister), Duration::from_millis(500));

        store.add_region(0, region(0.0)).unwrap();
        store.add_region(0, region(2.0)).unwrap();

        let now = Instant::now();
        assert!(!store.flush_if_due(now).unwrap());
        assert!(store.flush_if_due(now + Duration::from_secs(1)).unwrap());
        assert!(!store.flush_if_due(now + Duration::from_secs(2)).unwrap());
        assert_eq!(*writes.lock(), 1);
    }

    #[test]
    fn test_json_persister_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sessions").join("s.json");
        let mut session = Session::new("roundtrip", 60.0);
        session.add_region(1, region(3.0)).unwrap();

        let mut persister = JsonFilePersister::new(&path);
        persister.persist(&session).unwrap();

        let loaded = JsonFilePersister::load(&path).unwrap();
        pretty_assertions::assert_eq!(loaded, session);
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("createdAt"));
    }
}
