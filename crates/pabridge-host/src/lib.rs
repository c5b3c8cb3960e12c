//! Engines drive the callback bridge: they own the audio thread and call the trampoline pair.

use core::ffi::c_void;
use std::time::Duration;

use pabridge_sys::{PaStreamCallback, PaStreamFinishedCallback};
use serde::Serialize;

pub mod config;
pub mod error;
pub mod sim;
pub mod stream;

#[cfg(feature = "portaudio")]
pub mod portaudio;

#[cfg(not(feature = "portaudio"))]
pub mod portaudio {
    use super::*;

    /// Placeholder used when the crate is built without the system library.
    #[derive(Debug, Default, Clone)]
    pub struct PortAudioEngine;

    impl PortAudioEngine {
        pub fn new() -> Result<Self> {
            Err(EngineError::Unavailable("portaudio"))
        }
    }

    impl Engine for PortAudioEngine {
        fn name(&self) -> &'static str {
            "portaudio (stub)"
        }

        fn version(&self) -> VersionInfo {
            VersionInfo::default()
        }

        unsafe fn open(
            &self,
            _params: &StreamParameters,
            _callback: PaStreamCallback,
            _finished: PaStreamFinishedCallback,
            _user_data: *mut c_void,
        ) -> Result<Box<dyn EngineStream>> {
            Err(EngineError::Unavailable("portaudio"))
        }
    }
}

pub use config::{ConfigError, DeviceDefaults, StreamDeviceParameters, StreamFlags, StreamParameters};
pub use error::{EngineError, ErrorCode, HostApiType, Result};
pub use portaudio::PortAudioEngine;
pub use sim::{Capture, CapturedBuffer, ContractViolations, InputSignal, SimulatedBlock, SimulatedEngine};
pub use stream::Stream;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    pub major: u32,
    pub minor: u32,
    pub sub_minor: u32,
    pub control_revision: String,
    pub text: String,
}

impl VersionInfo {
    /// Packed `major.minor.sub_minor` as the engine reports its version number.
    pub fn number(&self) -> u32 {
        (self.major << 16) | (self.minor << 8) | self.sub_minor
    }
}

/// Latencies and sample rate the engine settled on for an open stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StreamInfo {
    pub input_latency: Duration,
    pub output_latency: Duration,
    pub sample_rate: f64,
}

/// An open engine stream. Control calls come from a non-real-time thread.
pub trait EngineStream: Send {
    fn start(&mut self) -> Result<()>;
    /// Stops after pending buffers have played; the finished callback has run on return.
    fn stop(&mut self) -> Result<()>;
    /// Stops as soon as possible, discarding pending buffers.
    fn abort(&mut self) -> Result<()>;
    /// Releases the stream. No callback for it runs after this returns `Ok`.
    fn close(&mut self) -> Result<()>;
    fn is_active(&self) -> Result<bool>;
    fn is_stopped(&self) -> Result<bool>;
    fn cpu_load(&self) -> f64;
    /// Stream clock in seconds.
    fn time(&self) -> f64;
    fn info(&self) -> Result<StreamInfo>;
}

pub trait Engine: Send + Sync {
    fn name(&self) -> &'static str;
    fn version(&self) -> VersionInfo;

    /// Opens a callback stream.
    ///
    /// # Safety
    /// `callback` and `finished` must be sound to call with `user_data`, buffers laid out per
    /// `params`, and any frame count, for as long as the returned stream is open.
    unsafe fn open(
        &self,
        params: &StreamParameters,
        callback: PaStreamCallback,
        finished: PaStreamFinishedCallback,
        user_data: *mut c_void,
    ) -> Result<Box<dyn EngineStream>>;
}
