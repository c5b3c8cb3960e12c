//! Stream configuration.

use std::fs;
use std::ops::{BitOr, BitOrAssign};
use std::path::{Path, PathBuf};

use pabridge_rt::{SampleFormat, StreamLayout};
use pabridge_sys::{
    paClipOff, paDitherOff, paNeverDropInput, paNoFlag, paPlatformSpecificFlags,
    paPrimeOutputBuffersUsingStreamCallback, PaStreamFlags,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{EngineError, ErrorCode};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read stream configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid stream configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Open-time stream behaviour flags, bit-compatible with the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamFlags(PaStreamFlags);

impl StreamFlags {
    pub const NO_FLAG: Self = Self(paNoFlag);
    pub const CLIP_OFF: Self = Self(paClipOff);
    pub const DITHER_OFF: Self = Self(paDitherOff);
    pub const NEVER_DROP_INPUT: Self = Self(paNeverDropInput);
    pub const PRIME_OUTPUT_BUFFERS_USING_STREAM_CALLBACK: Self =
        Self(paPrimeOutputBuffersUsingStreamCallback);
    pub const PLATFORM_SPECIFIC: Self = Self(paPlatformSpecificFlags);

    const PORTABLE: PaStreamFlags =
        paClipOff | paDitherOff | paNeverDropInput | paPrimeOutputBuffersUsingStreamCallback;

    pub const fn from_bits_retain(bits: PaStreamFlags) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> PaStreamFlags {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when only host-independent flags are set.
    pub const fn is_portable(self) -> bool {
        self.0 & !Self::PORTABLE == 0
    }
}

impl BitOr for StreamFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for StreamFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// One direction of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamDeviceParameters {
    /// Engine device index; `None` selects the default device for this direction.
    pub device: Option<u32>,
    pub channels: usize,
    /// Suggested latency in seconds.
    pub suggested_latency: f64,
}

impl Default for StreamDeviceParameters {
    fn default() -> Self {
        Self {
            device: None,
            channels: 2,
            suggested_latency: 0.01,
        }
    }
}

impl StreamDeviceParameters {
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            ..Self::default()
        }
    }

    pub fn with_device(mut self, device: u32) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_latency(mut self, seconds: f64) -> Self {
        self.suggested_latency = seconds;
        self
    }
}

/// Defaults a device reports, used by the latency presets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceDefaults {
    pub device: u32,
    pub max_input_channels: usize,
    pub max_output_channels: usize,
    pub default_low_input_latency: f64,
    pub default_high_input_latency: f64,
    pub default_low_output_latency: f64,
    pub default_high_output_latency: f64,
    pub default_sample_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamParameters {
    pub input: Option<StreamDeviceParameters>,
    pub output: Option<StreamDeviceParameters>,
    pub sample_rate: f64,
    pub format: SampleFormat,
    /// `None` lets the engine choose, possibly varying per buffer.
    pub frames_per_buffer: Option<u32>,
    pub flags: StreamFlags,
}

impl Default for StreamParameters {
    fn default() -> Self {
        Self {
            input: None,
            output: Some(StreamDeviceParameters::default()),
            sample_rate: 48_000.0,
            format: SampleFormat::Float32,
            frames_per_buffer: Some(256),
            flags: StreamFlags::NO_FLAG,
        }
    }
}

impl StreamParameters {
    pub fn output(channels: usize, sample_rate: f64, format: SampleFormat) -> Self {
        Self {
            input: None,
            output: Some(StreamDeviceParameters::new(channels)),
            sample_rate,
            format,
            ..Self::default()
        }
    }

    pub fn input(channels: usize, sample_rate: f64, format: SampleFormat) -> Self {
        Self {
            input: Some(StreamDeviceParameters::new(channels)),
            output: None,
            sample_rate,
            format,
            ..Self::default()
        }
    }

    pub fn duplex(
        input_channels: usize,
        output_channels: usize,
        sample_rate: f64,
        format: SampleFormat,
    ) -> Self {
        Self {
            input: Some(StreamDeviceParameters::new(input_channels)),
            output: Some(StreamDeviceParameters::new(output_channels)),
            sample_rate,
            format,
            ..Self::default()
        }
    }

    pub fn with_frames_per_buffer(mut self, frames: Option<u32>) -> Self {
        self.frames_per_buffer = frames;
        self
    }

    pub fn with_flags(mut self, flags: StreamFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Mono in, stereo out where supported, high latency, the smaller default sample rate.
    pub fn high_latency(input: Option<&DeviceDefaults>, output: Option<&DeviceDefaults>) -> Self {
        Self::preset(input, output, Latency::High)
    }

    /// Mono in, stereo out where supported, low latency, the larger default sample rate.
    pub fn low_latency(input: Option<&DeviceDefaults>, output: Option<&DeviceDefaults>) -> Self {
        Self::preset(input, output, Latency::Low)
    }

    fn preset(
        input: Option<&DeviceDefaults>,
        output: Option<&DeviceDefaults>,
        latency: Latency,
    ) -> Self {
        let mut sample_rate = 0.0;
        let input = input.map(|device| {
            sample_rate = device.default_sample_rate;
            StreamDeviceParameters {
                device: Some(device.device),
                channels: device.max_input_channels.min(1),
                suggested_latency: match latency {
                    Latency::Low => device.default_low_input_latency,
                    Latency::High => device.default_high_input_latency,
                },
            }
        });
        let output = output.map(|device| {
            let rate = device.default_sample_rate;
            let better = match latency {
                Latency::Low => rate > sample_rate,
                Latency::High => rate < sample_rate || sample_rate == 0.0,
            };
            if better {
                sample_rate = rate;
            }
            StreamDeviceParameters {
                device: Some(device.device),
                channels: device.max_output_channels.min(2),
                suggested_latency: match latency {
                    Latency::Low => device.default_low_output_latency,
                    Latency::High => device.default_high_output_latency,
                },
            }
        });
        Self {
            input,
            output,
            sample_rate,
            format: SampleFormat::Float32,
            frames_per_buffer: None,
            flags: StreamFlags::NO_FLAG,
        }
    }

    pub fn input_channels(&self) -> usize {
        self.input.map_or(0, |input| input.channels)
    }

    pub fn output_channels(&self) -> usize {
        self.output.map_or(0, |output| output.channels)
    }

    /// Buffer layout the trampoline uses to size this stream's native memory.
    pub fn layout(&self) -> StreamLayout {
        StreamLayout::duplex(self.format, self.input_channels(), self.output_channels())
    }

    /// Checks the parameters the way the engine does at open time.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.input.is_none() && self.output.is_none() {
            return Err(ErrorCode::InvalidDevice.into());
        }
        for direction in [self.input, self.output].into_iter().flatten() {
            if direction.channels == 0 || i32::try_from(direction.channels).is_err() {
                return Err(ErrorCode::InvalidChannelCount.into());
            }
        }
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(ErrorCode::InvalidSampleRate.into());
        }
        if self.frames_per_buffer == Some(0) {
            return Err(ErrorCode::BufferTooSmall.into());
        }
        if !self.flags.is_portable() {
            return Err(ErrorCode::InvalidFlag.into());
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }
}

#[derive(Clone, Copy)]
enum Latency {
    Low,
    High,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn device(index: u32, inputs: usize, outputs: usize, rate: f64) -> DeviceDefaults {
        DeviceDefaults {
            device: index,
            max_input_channels: inputs,
            max_output_channels: outputs,
            default_low_input_latency: 0.005,
            default_high_input_latency: 0.05,
            default_low_output_latency: 0.006,
            default_high_output_latency: 0.06,
            default_sample_rate: rate,
        }
    }

    #[test]
    fn presets_pick_channels_latency_and_rate() {
        let mic = device(1, 4, 0, 44_100.0);
        let speakers = device(2, 0, 1, 48_000.0);

        let high = StreamParameters::high_latency(Some(&mic), Some(&speakers));
        assert_eq!(high.sample_rate, 44_100.0);
        assert_eq!(high.input_channels(), 1);
        assert_eq!(high.output_channels(), 1);
        assert_eq!(high.output.map(|p| p.suggested_latency), Some(0.06));
        assert_eq!(high.frames_per_buffer, None);

        let low = StreamParameters::low_latency(Some(&mic), Some(&speakers));
        assert_eq!(low.sample_rate, 48_000.0);
        assert_eq!(low.input.map(|p| p.suggested_latency), Some(0.005));
        assert_eq!(low.input.and_then(|p| p.device), Some(1));

        let output_only = StreamParameters::high_latency(None, Some(&device(0, 0, 8, 96_000.0)));
        assert!(output_only.input.is_none());
        assert_eq!(output_only.output_channels(), 2);
        assert_eq!(output_only.sample_rate, 96_000.0);
    }

    #[test]
    fn validation_uses_native_codes() {
        let code = |params: StreamParameters| params.validate().err().and_then(|err| err.code());

        assert_eq!(code(StreamParameters::default()), None);
        assert_eq!(
            code(StreamParameters {
                output: None,
                ..StreamParameters::default()
            }),
            Some(ErrorCode::InvalidDevice)
        );
        assert_eq!(
            code(StreamParameters::output(0, 48_000.0, SampleFormat::Int16)),
            Some(ErrorCode::InvalidChannelCount)
        );
        assert_eq!(
            code(StreamParameters::output(2, f64::NAN, SampleFormat::Int16)),
            Some(ErrorCode::InvalidSampleRate)
        );
        assert_eq!(
            code(StreamParameters::default().with_frames_per_buffer(Some(0))),
            Some(ErrorCode::BufferTooSmall)
        );
        assert_eq!(
            code(StreamParameters::default().with_flags(StreamFlags::from_bits_retain(0x0001_0000))),
            Some(ErrorCode::InvalidFlag)
        );
        assert_eq!(
            code(StreamParameters::default().with_flags(
                StreamFlags::CLIP_OFF | StreamFlags::PRIME_OUTPUT_BUFFERS_USING_STREAM_CALLBACK
            )),
            None
        );
    }

    #[test]
    fn json_config_fills_defaults() {
        let params = StreamParameters::from_json_str(
            r#"{ "output": { "channels": 1 }, "format": "int16", "flags": 3 }"#,
        )
        .expect("parse");
        assert_eq!(params.output_channels(), 1);
        assert_eq!(params.format, SampleFormat::Int16);
        assert_eq!(params.sample_rate, 48_000.0);
        assert!(params.flags.contains(StreamFlags::DITHER_OFF));
        assert_eq!(params.layout(), StreamLayout::output_only(SampleFormat::Int16, 1));

        let json = params.to_json().expect("serialise");
        assert_eq!(StreamParameters::from_json_str(&json).expect("reparse"), params);
        assert!(matches!(
            StreamParameters::from_json_str("{ \"format\": \"float64\" }"),
            Err(ConfigError::Parse(_))
        ));
    }
}
