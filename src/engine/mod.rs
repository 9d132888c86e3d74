//! Audio Engine Module
//!
//! Timing and data-flow core of the recorder:
//! - Audio buffers and WAV I/O
//! - Source resolution and the region pre-renderer
//! - Clock anchor and playback scheduler
//! - Recorder with latency compensation
//! - Device seams, engine arena and the transport that coordinates them

pub mod buffer;
pub mod clock;
pub mod device;
pub mod events;
pub mod io;
pub mod prerender;
pub mod recorder;
pub mod scheduler;
pub mod source;
pub mod space;
pub mod testing;
pub mod transport;

pub use buffer::AudioBuffer;
pub use clock::{ClockAnchor, SystemWallClock, WallClock};
pub use device::{CaptureTap, DeviceFormat, Engine, EngineHandle, InputDevice, OutputDevice};
pub use events::{EngineEvent, Interruption};
pub use io::{generate_test_tone, read_wav, write_wav, SampleEncoding};
pub use prerender::{BufferSlice, PrerenderCache, RegionPrerenderer};
pub use recorder::{LevelMeter, Recorder, RecorderState};
pub use scheduler::{PlaybackScheduler, PlayerState};
pub use source::{AudioSource, DirectoryResolver, SourceResolver, WavFileSource};
pub use space::{DiskSpaceProbe, SpaceProbe};
pub use transport::{Collaborators, Transport, TransportState};
