#![no_std]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(non_upper_case_globals)]

//! Hand-maintained mirror of the parts of `portaudio.h` (v19) that the callback bridge touches.
//!
//! Every type here crosses the native boundary by value or by pointer, so field order, width and
//! alignment must match the C header exactly. Layouts are asserted at compile time at the bottom
//! of this file.

use core::ffi::{c_char, c_double, c_int, c_long, c_ulong, c_void};

pub type PaError = c_int;
pub type PaDeviceIndex = c_int;
pub type PaHostApiIndex = c_int;
pub type PaHostApiTypeId = c_int;
pub type PaTime = c_double;
pub type PaSampleFormat = c_ulong;
pub type PaStreamFlags = c_ulong;
pub type PaStreamCallbackFlags = c_ulong;

/// Opaque stream object owned by the engine.
pub type PaStream = c_void;

pub const paNoError: PaError = 0;
pub const paNotInitialized: PaError = -10000;
pub const paUnanticipatedHostError: PaError = -9999;
pub const paInvalidChannelCount: PaError = -9998;
pub const paInvalidSampleRate: PaError = -9997;
pub const paInvalidDevice: PaError = -9996;
pub const paInvalidFlag: PaError = -9995;
pub const paSampleFormatNotSupported: PaError = -9994;
pub const paBadIODeviceCombination: PaError = -9993;
pub const paInsufficientMemory: PaError = -9992;
pub const paBufferTooBig: PaError = -9991;
pub const paBufferTooSmall: PaError = -9990;
pub const paNullCallback: PaError = -9989;
pub const paBadStreamPtr: PaError = -9988;
pub const paTimedOut: PaError = -9987;
pub const paInternalError: PaError = -9986;
pub const paDeviceUnavailable: PaError = -9985;
pub const paIncompatibleHostApiSpecificStreamInfo: PaError = -9984;
pub const paStreamIsStopped: PaError = -9983;
pub const paStreamIsNotStopped: PaError = -9982;
pub const paInputOverflowed: PaError = -9981;
pub const paOutputUnderflowed: PaError = -9980;
pub const paHostApiNotFound: PaError = -9979;
pub const paInvalidHostApi: PaError = -9978;
pub const paCanNotReadFromACallbackStream: PaError = -9977;
pub const paCanNotWriteToACallbackStream: PaError = -9976;
pub const paCanNotReadFromAnOutputOnlyStream: PaError = -9975;
pub const paCanNotWriteToAnInputOnlyStream: PaError = -9974;
pub const paIncompatibleStreamHostApi: PaError = -9973;
pub const paBadBufferPtr: PaError = -9972;

pub const paNoDevice: PaDeviceIndex = -1;
pub const paUseHostApiSpecificDeviceSpecification: PaDeviceIndex = -2;

pub const paInDevelopment: PaHostApiTypeId = 0;
pub const paDirectSound: PaHostApiTypeId = 1;
pub const paMME: PaHostApiTypeId = 2;
pub const paASIO: PaHostApiTypeId = 3;
pub const paSoundManager: PaHostApiTypeId = 4;
pub const paCoreAudio: PaHostApiTypeId = 5;
pub const paOSS: PaHostApiTypeId = 7;
pub const paALSA: PaHostApiTypeId = 8;
pub const paAL: PaHostApiTypeId = 9;
pub const paBeOS: PaHostApiTypeId = 10;
pub const paWDMKS: PaHostApiTypeId = 11;
pub const paJACK: PaHostApiTypeId = 12;
pub const paWASAPI: PaHostApiTypeId = 13;
pub const paAudioScienceHPI: PaHostApiTypeId = 14;

pub const paFloat32: PaSampleFormat = 0x0000_0001;
pub const paInt32: PaSampleFormat = 0x0000_0002;
pub const paInt24: PaSampleFormat = 0x0000_0004;
pub const paInt16: PaSampleFormat = 0x0000_0008;
pub const paInt8: PaSampleFormat = 0x0000_0010;
pub const paUInt8: PaSampleFormat = 0x0000_0020;
pub const paCustomFormat: PaSampleFormat = 0x0001_0000;
pub const paNonInterleaved: PaSampleFormat = 0x8000_0000;

pub const paFramesPerBufferUnspecified: c_ulong = 0;

pub const paNoFlag: PaStreamFlags = 0;
pub const paClipOff: PaStreamFlags = 0x0000_0001;
pub const paDitherOff: PaStreamFlags = 0x0000_0002;
pub const paNeverDropInput: PaStreamFlags = 0x0000_0004;
pub const paPrimeOutputBuffersUsingStreamCallback: PaStreamFlags = 0x0000_0008;
pub const paPlatformSpecificFlags: PaStreamFlags = 0xFFFF_0000;

pub const paInputUnderflow: PaStreamCallbackFlags = 0x0000_0001;
pub const paInputOverflow: PaStreamCallbackFlags = 0x0000_0002;
pub const paOutputUnderflow: PaStreamCallbackFlags = 0x0000_0004;
pub const paOutputOverflow: PaStreamCallbackFlags = 0x0000_0008;
pub const paPrimingOutput: PaStreamCallbackFlags = 0x0000_0010;

/// `PaStreamCallbackResult`.
pub const paContinue: c_int = 0;
pub const paComplete: c_int = 1;
pub const paAbort: c_int = 2;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PaStreamCallbackTimeInfo {
    pub inputBufferAdcTime: PaTime,
    pub currentTime: PaTime,
    pub outputBufferDacTime: PaTime,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PaStreamParameters {
    pub device: PaDeviceIndex,
    pub channelCount: c_int,
    pub sampleFormat: PaSampleFormat,
    pub suggestedLatency: PaTime,
    pub hostApiSpecificStreamInfo: *mut c_void,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PaStreamInfo {
    pub structVersion: c_int,
    pub inputLatency: PaTime,
    pub outputLatency: PaTime,
    pub sampleRate: c_double,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PaVersionInfo {
    pub versionMajor: c_int,
    pub versionMinor: c_int,
    pub versionSubMinor: c_int,
    pub versionControlRevision: *const c_char,
    pub versionText: *const c_char,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PaHostErrorInfo {
    pub hostApiType: PaHostApiTypeId,
    pub errorCode: c_long,
    pub errorText: *const c_char,
}

/// `PaStreamCallback`: invoked on the engine's audio thread once per buffer.
pub type PaStreamCallback = unsafe extern "C" fn(
    input: *const c_void,
    output: *mut c_void,
    frameCount: c_ulong,
    timeInfo: *const PaStreamCallbackTimeInfo,
    statusFlags: PaStreamCallbackFlags,
    userData: *mut c_void,
) -> c_int;

/// `PaStreamFinishedCallback`: invoked at most once when a stream becomes inactive.
pub type PaStreamFinishedCallback = unsafe extern "C" fn(userData: *mut c_void);

#[cfg(feature = "link")]
#[link(name = "portaudio")]
extern "C" {
    pub fn Pa_GetVersion() -> c_int;
    pub fn Pa_GetVersionText() -> *const c_char;
    pub fn Pa_GetVersionInfo() -> *const PaVersionInfo;
    pub fn Pa_GetErrorText(errorCode: PaError) -> *const c_char;
    pub fn Pa_GetLastHostErrorInfo() -> *const PaHostErrorInfo;
    pub fn Pa_Initialize() -> PaError;
    pub fn Pa_Terminate() -> PaError;
    pub fn Pa_GetDefaultInputDevice() -> PaDeviceIndex;
    pub fn Pa_GetDefaultOutputDevice() -> PaDeviceIndex;
    pub fn Pa_OpenStream(
        stream: *mut *mut PaStream,
        inputParameters: *const PaStreamParameters,
        outputParameters: *const PaStreamParameters,
        sampleRate: c_double,
        framesPerBuffer: c_ulong,
        streamFlags: PaStreamFlags,
        streamCallback: Option<PaStreamCallback>,
        userData: *mut c_void,
    ) -> PaError;
    pub fn Pa_SetStreamFinishedCallback(
        stream: *mut PaStream,
        streamFinishedCallback: Option<PaStreamFinishedCallback>,
    ) -> PaError;
    pub fn Pa_CloseStream(stream: *mut PaStream) -> PaError;
    pub fn Pa_StartStream(stream: *mut PaStream) -> PaError;
    pub fn Pa_StopStream(stream: *mut PaStream) -> PaError;
    pub fn Pa_AbortStream(stream: *mut PaStream) -> PaError;
    pub fn Pa_IsStreamStopped(stream: *mut PaStream) -> PaError;
    pub fn Pa_IsStreamActive(stream: *mut PaStream) -> PaError;
    pub fn Pa_GetStreamInfo(stream: *mut PaStream) -> *const PaStreamInfo;
    pub fn Pa_GetStreamTime(stream: *mut PaStream) -> PaTime;
    pub fn Pa_GetStreamCpuLoad(stream: *mut PaStream) -> c_double;
    pub fn Pa_GetSampleSize(format: PaSampleFormat) -> PaError;
}

const _: () = {
    use core::mem::{align_of, offset_of, size_of};

    assert!(size_of::<PaStreamCallbackTimeInfo>() == 24);
    assert!(align_of::<PaStreamCallbackTimeInfo>() == align_of::<f64>());
    assert!(offset_of!(PaStreamCallbackTimeInfo, inputBufferAdcTime) == 0);
    assert!(offset_of!(PaStreamCallbackTimeInfo, currentTime) == 8);
    assert!(offset_of!(PaStreamCallbackTimeInfo, outputBufferDacTime) == 16);
    assert!(size_of::<PaStreamCallbackFlags>() == size_of::<c_ulong>());
    assert!(size_of::<Option<PaStreamCallback>>() == size_of::<*const c_void>());
    assert!(size_of::<Option<PaStreamFinishedCallback>>() == size_of::<*const c_void>());
};
