//! Session data model
//!
//! Value types describing what plays when, plus the store that owns the
//! mutable session on the coordinating context.

pub mod region;
pub mod session;
pub mod store;
pub mod timeline;
pub mod track;

pub use region::{Region, RegionId, SourceHandle};
pub use session::{Session, TimeSignature, TrimEdge, TRACK_COUNT};
pub use store::{ChangeKind, JsonFilePersister, SessionChange, SessionPersister, SessionStore};
pub use timeline::{LoopRange, TimelineState};
pub use track::{DelayParams, EqBand, ReverbParams, RoomSize, SaturationParams, Track, TrackFx};
