//! Engine error taxonomy.

use core::fmt;

use pabridge_rt::{BindingError, RegistryError};
use pabridge_sys::*;
use thiserror::Error;

macro_rules! error_codes {
    ($($variant:ident = $native:ident => $text:literal,)+) => {
        /// Native engine error codes, `-10000` through `-9972`.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ErrorCode {
            $($variant,)+
        }

        impl ErrorCode {
            pub const ALL: &'static [ErrorCode] = &[$(ErrorCode::$variant,)+];

            pub const fn code(self) -> PaError {
                match self {
                    $(Self::$variant => $native,)+
                }
            }

            /// Maps a native result code. `paNoError` and unknown values yield `None`.
            #[allow(non_upper_case_globals)]
            pub const fn from_code(code: PaError) -> Option<Self> {
                match code {
                    $($native => Some(Self::$variant),)+
                    _ => None,
                }
            }

            pub const fn text(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }
    };
}

error_codes! {
    NotInitialized = paNotInitialized => "PortAudio not initialized",
    UnanticipatedHostError = paUnanticipatedHostError => "Unanticipated host error",
    InvalidChannelCount = paInvalidChannelCount => "Invalid number of channels",
    InvalidSampleRate = paInvalidSampleRate => "Invalid sample rate",
    InvalidDevice = paInvalidDevice => "Invalid device",
    InvalidFlag = paInvalidFlag => "Invalid flag",
    SampleFormatNotSupported = paSampleFormatNotSupported => "Sample format not supported",
    BadIoDeviceCombination = paBadIODeviceCombination => "Illegal combination of I/O devices",
    InsufficientMemory = paInsufficientMemory => "Insufficient memory",
    BufferTooBig = paBufferTooBig => "Buffer too big",
    BufferTooSmall = paBufferTooSmall => "Buffer too small",
    NullCallback = paNullCallback => "No callback routine specified",
    BadStreamPtr = paBadStreamPtr => "Invalid stream pointer",
    TimedOut = paTimedOut => "Wait timed out",
    InternalError = paInternalError => "Internal PortAudio error",
    DeviceUnavailable = paDeviceUnavailable => "Device unavailable",
    IncompatibleHostApiSpecificStreamInfo = paIncompatibleHostApiSpecificStreamInfo
        => "Incompatible host API specific stream info",
    StreamIsStopped = paStreamIsStopped => "Stream is stopped",
    StreamIsNotStopped = paStreamIsNotStopped => "Stream is not stopped",
    InputOverflowed = paInputOverflowed => "Input overflowed",
    OutputUnderflowed = paOutputUnderflowed => "Output underflowed",
    HostApiNotFound = paHostApiNotFound => "Host API not found",
    InvalidHostApi = paInvalidHostApi => "Invalid host API",
    CanNotReadFromACallbackStream = paCanNotReadFromACallbackStream
        => "Can't read from a callback stream",
    CanNotWriteToACallbackStream = paCanNotWriteToACallbackStream
        => "Can't write to a callback stream",
    CanNotReadFromAnOutputOnlyStream = paCanNotReadFromAnOutputOnlyStream
        => "Can't read from an output only stream",
    CanNotWriteToAnInputOnlyStream = paCanNotWriteToAnInputOnlyStream
        => "Can't write to an input only stream",
    IncompatibleStreamHostApi = paIncompatibleStreamHostApi => "Incompatible stream host API",
    BadBufferPtr = paBadBufferPtr => "Bad buffer pointer",
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// Host audio API that produced an unanticipated host error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostApiType {
    InDevelopment,
    DirectSound,
    Mme,
    Asio,
    SoundManager,
    CoreAudio,
    Oss,
    Alsa,
    Al,
    BeOs,
    WdmKs,
    Jack,
    Wasapi,
    AudioScienceHpi,
    Other(PaHostApiTypeId),
}

impl HostApiType {
    #[allow(non_upper_case_globals)]
    pub const fn from_id(id: PaHostApiTypeId) -> Self {
        match id {
            paInDevelopment => Self::InDevelopment,
            paDirectSound => Self::DirectSound,
            paMME => Self::Mme,
            paASIO => Self::Asio,
            paSoundManager => Self::SoundManager,
            paCoreAudio => Self::CoreAudio,
            paOSS => Self::Oss,
            paALSA => Self::Alsa,
            paAL => Self::Al,
            paBeOS => Self::BeOs,
            paWDMKS => Self::WdmKs,
            paJACK => Self::Jack,
            paWASAPI => Self::Wasapi,
            paAudioScienceHPI => Self::AudioScienceHpi,
            other => Self::Other(other),
        }
    }

    pub const fn id(self) -> PaHostApiTypeId {
        match self {
            Self::InDevelopment => paInDevelopment,
            Self::DirectSound => paDirectSound,
            Self::Mme => paMME,
            Self::Asio => paASIO,
            Self::SoundManager => paSoundManager,
            Self::CoreAudio => paCoreAudio,
            Self::Oss => paOSS,
            Self::Alsa => paALSA,
            Self::Al => paAL,
            Self::BeOs => paBeOS,
            Self::WdmKs => paWDMKS,
            Self::Jack => paJACK,
            Self::Wasapi => paWASAPI,
            Self::AudioScienceHpi => paAudioScienceHPI,
            Self::Other(id) => id,
        }
    }
}

impl fmt::Display for HostApiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InDevelopment => "InDevelopment",
            Self::DirectSound => "DirectSound",
            Self::Mme => "MME",
            Self::Asio => "ASIO",
            Self::SoundManager => "SoundManager",
            Self::CoreAudio => "CoreAudio",
            Self::Oss => "OSS",
            Self::Alsa => "ALSA",
            Self::Al => "AL",
            Self::BeOs => "BeOS",
            Self::WdmKs => "WDMKS",
            Self::Jack => "JACK",
            Self::Wasapi => "WASAPI",
            Self::AudioScienceHpi => "AudioScienceHPI",
            Self::Other(id) => return write!(f, "host API {id}"),
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Native(ErrorCode),
    #[error("{text}; code: {code}; api type: {api}")]
    Host {
        api: HostApiType,
        code: i64,
        text: String,
    },
    #[error("unknown engine error code {0}")]
    Unknown(PaError),
    #[error(transparent)]
    Binding(#[from] BindingError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("stream has already run; open a new stream to play again")]
    StreamReused,
    #[error("{0} engine is not available in this build")]
    Unavailable(&'static str),
}

impl EngineError {
    /// Native code carried by this error, if it came from the engine.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Native(code) => Some(*code),
            Self::Host { .. } => Some(ErrorCode::UnanticipatedHostError),
            _ => None,
        }
    }

    /// Converts a non-host native result code. Non-negative codes are not errors.
    pub fn from_native(code: PaError) -> Option<Self> {
        if code >= paNoError {
            return None;
        }
        Some(match ErrorCode::from_code(code) {
            Some(code) => Self::Native(code),
            None => Self::Unknown(code),
        })
    }
}

impl From<ErrorCode> for EngineError {
    fn from(code: ErrorCode) -> Self {
        Self::Native(code)
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
