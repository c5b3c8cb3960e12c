//! Sample formats negotiated with the engine.

use pabridge_sys::{
    paCustomFormat, paFloat32, paInt16, paInt24, paInt32, paInt8, paNonInterleaved, paUInt8,
    PaSampleFormat,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("non-interleaved buffers are not supported")]
    NonInterleaved,
    #[error("custom sample formats are not supported")]
    Custom,
    #[error("unknown sample format {0:#x}")]
    Unknown(u64),
}

/// Interleaved sample encodings understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    Float32,
    Int32,
    /// Packed native-endian 24-bit integers, three bytes per sample.
    Int24,
    Int16,
    Int8,
    UInt8,
}

impl SampleFormat {
    pub const BYTE: Self = Self::UInt8;

    pub const ALL: [Self; 6] = [
        Self::Float32,
        Self::Int32,
        Self::Int24,
        Self::Int16,
        Self::Int8,
        Self::UInt8,
    ];

    pub const fn sample_size(self) -> usize {
        match self {
            Self::Float32 | Self::Int32 => 4,
            Self::Int24 => 3,
            Self::Int16 => 2,
            Self::Int8 | Self::UInt8 => 1,
        }
    }

    pub const fn to_native(self) -> PaSampleFormat {
        match self {
            Self::Float32 => paFloat32,
            Self::Int32 => paInt32,
            Self::Int24 => paInt24,
            Self::Int16 => paInt16,
            Self::Int8 => paInt8,
            Self::UInt8 => paUInt8,
        }
    }

    #[allow(non_upper_case_globals)]
    pub fn from_native(raw: PaSampleFormat) -> Result<Self, FormatError> {
        if raw & paNonInterleaved != 0 {
            return Err(FormatError::NonInterleaved);
        }
        if raw & paCustomFormat != 0 {
            return Err(FormatError::Custom);
        }
        match raw {
            paFloat32 => Ok(Self::Float32),
            paInt32 => Ok(Self::Int32),
            paInt24 => Ok(Self::Int24),
            paInt16 => Ok(Self::Int16),
            paInt8 => Ok(Self::Int8),
            paUInt8 => Ok(Self::UInt8),
            other => Err(FormatError::Unknown(u64::from(other))),
        }
    }

    /// Byte pattern that encodes digital silence. Unsigned 8-bit audio is centred on `0x80`.
    pub const fn silence_byte(self) -> u8 {
        match self {
            Self::UInt8 => 0x80,
            _ => 0,
        }
    }
}

/// Rust sample types with a direct in-memory mapping onto a [`SampleFormat`].
///
/// Packed 24-bit audio has no native Rust type and is only reachable as raw bytes.
pub trait Sample: bytemuck::Pod {
    const FORMAT: SampleFormat;
}

impl Sample for f32 {
    const FORMAT: SampleFormat = SampleFormat::Float32;
}

impl Sample for i32 {
    const FORMAT: SampleFormat = SampleFormat::Int32;
}

impl Sample for i16 {
    const FORMAT: SampleFormat = SampleFormat::Int16;
}

impl Sample for i8 {
    const FORMAT: SampleFormat = SampleFormat::Int8;
}

impl Sample for u8 {
    const FORMAT: SampleFormat = SampleFormat::UInt8;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_codes_round_trip() {
        for format in [
            SampleFormat::Float32,
            SampleFormat::Int32,
            SampleFormat::Int24,
            SampleFormat::Int16,
            SampleFormat::Int8,
            SampleFormat::UInt8,
        ] {
            assert_eq!(SampleFormat::from_native(format.to_native()), Ok(format));
        }
    }

    #[test]
    fn rejects_non_interleaved_and_custom() {
        assert_eq!(
            SampleFormat::from_native(paFloat32 | paNonInterleaved),
            Err(FormatError::NonInterleaved)
        );
        assert_eq!(
            SampleFormat::from_native(paCustomFormat),
            Err(FormatError::Custom)
        );
        assert_eq!(
            SampleFormat::from_native(paFloat32 | paInt16),
            Err(FormatError::Unknown(0x9))
        );
    }

    #[test]
    fn sample_sizes_match_engine() {
        assert_eq!(SampleFormat::Int24.sample_size(), 3);
        assert_eq!(SampleFormat::BYTE.sample_size(), 1);
        assert_eq!(SampleFormat::UInt8.silence_byte(), 0x80);
        assert_eq!(SampleFormat::Int16.silence_byte(), 0);
    }
}
