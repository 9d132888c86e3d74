//! Device seams and the engine arena
//!
//! The engine owns the output and input devices. The scheduler and the
//! recorder never hold them; they receive a copyable [`EngineHandle`] and
//! borrow the device through [`Engine`] for the length of one operation. A
//! handle from before a rebuild (e.g. after a route change) is rejected.

use crate::engine::prerender::BufferSlice;
use crate::error::{FourtrackError, Result};
use crate::fx::{MainBus, TrackChain};

/// Format a device is actually running at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Push-style output sink with per-track players
pub trait OutputDevice: Send {
    /// Format the hardware is actually running at
    fn format(&self) -> DeviceFormat;

    fn start(&mut self) -> Result<()>;

    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Current hardware sample counter
    ///
    /// `None` until the device has rendered its first buffer.
    fn current_sample_time(&self) -> Option<i64>;

    /// Input + output + buffer latency in seconds for the active route
    fn round_trip_latency(&self) -> f64;

    /// Queue a mono slice on a track's player to start at `at_sample`
    fn schedule(&mut self, track: usize, slice: BufferSlice, at_sample: i64) -> Result<()>;

    /// Drop everything queued on a track's player
    fn clear_track(&mut self, track: usize);

    /// Route a track's player through `chain`, replacing the previous one
    fn set_track_chain(&mut self, track: usize, chain: TrackChain) -> Result<()>;

    /// Main mixer and limiter that every track chain sums into
    fn set_main_bus(&mut self, bus: MainBus) -> Result<()>;
}

/// Per-invocation capture callback state
///
/// Called on the real-time input thread with interleaved samples in the
/// input device's format. Implementations must not block, allocate without
/// bound, or fail.
pub trait CaptureTap: Send {
    fn on_buffer(&mut self, samples: &[f32]);
}

/// Capture source that accepts one tap at a time
pub trait InputDevice: Send {
    fn format(&self) -> DeviceFormat;

    /// Install a tap, replacing any existing one
    fn install_tap(&mut self, tap: Box<dyn CaptureTap>) -> Result<()>;

    /// Remove and return the installed tap
    fn remove_tap(&mut self) -> Option<Box<dyn CaptureTap>>;

    fn has_tap(&self) -> bool;
}

/// Lightweight non-owning reference to an [`Engine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineHandle {
    generation: u64,
}

/// Owner of device resources
pub struct Engine {
    output: Box<dyn OutputDevice>,
    input: Option<Box<dyn InputDevice>>,
    generation: u64,
}

impl Engine {
    pub fn new(output: Box<dyn OutputDevice>, input: Option<Box<dyn InputDevice>>) -> Self {
        Self {
            output,
            input,
            generation: 1,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            generation: self.generation,
        }
    }

    pub fn is_current(&self, handle: EngineHandle) -> bool {
        handle.generation == self.generation
    }

    /// Replace the devices; every handle issued so far becomes stale
    pub fn rebuild(&mut self, output: Box<dyn OutputDevice>, input: Option<Box<dyn InputDevice>>) -> EngineHandle {
        self.output.stop();
        if let Some(input) = self.input.as_mut() {
            input.remove_tap();
        }
        self.output = output;
        self.input = input;
        self.generation += 1;
        self.handle()
    }

    pub fn output(&mut self, handle: EngineHandle) -> Result<&mut dyn OutputDevice> {
        self.check(handle)?;
        Ok(self.output.as_mut())
    }

    pub fn input(&mut self, handle: EngineHandle) -> Result<&mut dyn InputDevice> {
        self.check(handle)?;
        match self.input.as_mut() {
            Some(input) => Ok(input.as_mut()),
            None => Err(FourtrackError::EngineSetup {
                reason: "no input device available".to_string(),
            }),
        }
    }

    fn check(&self, handle: EngineHandle) -> Result<()> {
        if self.is_current(handle) {
            Ok(())
        } else {
            Err(FourtrackError::StaleEngineHandle)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{FakeInput, FakeOutput};

    #[test]
    fn test_stale_handle_is_rejected() {
        let mut engine = Engine::new(Box::new(FakeOutput::new(48000)), None);
        let old = engine.handle();
        assert!(engine.output(old).is_ok());

        let new = engine.rebuild(Box::new(FakeOutput::new(44100)), None);
        assert!(matches!(engine.output(old), Err(FourtrackError::StaleEngineHandle)));
        assert_eq!(engine.output(new).unwrap().format().sample_rate, 44100);
    }

    #[test]
    fn test_missing_input_is_setup_error() {
        let mut engine = Engine::new(Box::new(FakeOutput::new(48000)), None);
        let handle = engine.handle();
        assert_eq!(engine.input(handle).err().unwrap().error_code(), "ENGINE_SETUP");

        let mut engine = Engine::new(Box::new(FakeOutput::new(48000)), Some(Box::new(FakeInput::new(48000, 1))));
        let handle = engine.handle();
        assert!(!engine.input(handle).unwrap().has_tap());
    }
}
