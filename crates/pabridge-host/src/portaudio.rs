//! System PortAudio engine.

use core::ffi::{c_char, c_int, c_ulong, c_void, CStr};
use std::sync::Arc;

use pabridge_rt::timing::seconds;
use pabridge_sys::*;
use parking_lot::Mutex;

use super::*;

static INIT_COUNT: Mutex<usize> = parking_lot::const_mutex(0);

/// Converts a native result, resolving unanticipated host errors to their host-API details.
fn check(code: PaError) -> Result<PaError> {
    if code == paUnanticipatedHostError {
        return Err(last_host_error());
    }
    match EngineError::from_native(code) {
        Some(err) => Err(err),
        None => Ok(code),
    }
}

fn last_host_error() -> EngineError {
    // Safety: the engine returns null or a pointer valid until the next engine call.
    let info = unsafe { Pa_GetLastHostErrorInfo().as_ref() };
    match info {
        Some(info) => EngineError::Host {
            api: HostApiType::from_id(info.hostApiType),
            code: i64::from(info.errorCode),
            text: unsafe { owned_text(info.errorText) },
        },
        None => EngineError::Native(ErrorCode::UnanticipatedHostError),
    }
}

/// # Safety
/// `text` must be null or a valid NUL-terminated string.
unsafe fn owned_text(text: *const c_char) -> String {
    if text.is_null() {
        String::new()
    } else {
        CStr::from_ptr(text).to_string_lossy().into_owned()
    }
}

/// Keeps the native library initialised. Nested guards share one initialisation; the library is
/// terminated when the last guard drops.
#[derive(Debug)]
pub struct EngineLibrary {
    _private: (),
}

impl EngineLibrary {
    pub fn initialize() -> Result<Self> {
        let mut count = INIT_COUNT.lock();
        if *count == 0 {
            // Safety: serialised by `INIT_COUNT`.
            check(unsafe { Pa_Initialize() })?;
            tracing::debug!("initialised PortAudio");
        }
        *count += 1;
        Ok(Self { _private: () })
    }
}

impl Drop for EngineLibrary {
    fn drop(&mut self) {
        let mut count = INIT_COUNT.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            // Safety: serialised by `INIT_COUNT`; no guard, and so no stream, is left.
            if let Err(err) = check(unsafe { Pa_Terminate() }) {
                tracing::warn!(%err, "failed to terminate PortAudio");
            } else {
                tracing::debug!("terminated PortAudio");
            }
        }
    }
}

#[derive(Debug)]
pub struct PortAudioEngine {
    library: Arc<EngineLibrary>,
}

impl PortAudioEngine {
    pub fn new() -> Result<Self> {
        Ok(Self {
            library: Arc::new(EngineLibrary::initialize()?),
        })
    }

    fn native_parameters(
        direction: &StreamDeviceParameters,
        format: PaSampleFormat,
        default_device: unsafe extern "C" fn() -> PaDeviceIndex,
    ) -> Result<PaStreamParameters> {
        let device = match direction.device {
            Some(device) => {
                PaDeviceIndex::try_from(device).map_err(|_| EngineError::from(ErrorCode::InvalidDevice))?
            }
            // Safety: the library is initialised while `self.library` lives.
            None => unsafe { default_device() },
        };
        if device == paNoDevice {
            return Err(ErrorCode::InvalidDevice.into());
        }
        Ok(PaStreamParameters {
            device,
            channelCount: c_int::try_from(direction.channels)
                .map_err(|_| EngineError::from(ErrorCode::InvalidChannelCount))?,
            sampleFormat: format,
            suggestedLatency: direction.suggested_latency,
            hostApiSpecificStreamInfo: core::ptr::null_mut(),
        })
    }
}

impl Engine for PortAudioEngine {
    fn name(&self) -> &'static str {
        "portaudio"
    }

    fn version(&self) -> VersionInfo {
        // Safety: the library returns a pointer to static data.
        let Some(info) = (unsafe { Pa_GetVersionInfo().as_ref() }) else {
            return VersionInfo::default();
        };
        let clamp = |part: c_int| u32::try_from(part).unwrap_or_default();
        VersionInfo {
            major: clamp(info.versionMajor),
            minor: clamp(info.versionMinor),
            sub_minor: clamp(info.versionSubMinor),
            control_revision: unsafe { owned_text(info.versionControlRevision) },
            text: unsafe { owned_text(info.versionText) },
        }
    }

    unsafe fn open(
        &self,
        params: &StreamParameters,
        callback: PaStreamCallback,
        finished: PaStreamFinishedCallback,
        user_data: *mut c_void,
    ) -> Result<Box<dyn EngineStream>> {
        let format = params.format.to_native();
        let input = params
            .input
            .as_ref()
            .map(|input| Self::native_parameters(input, format, Pa_GetDefaultInputDevice))
            .transpose()?;
        let output = params
            .output
            .as_ref()
            .map(|output| Self::native_parameters(output, format, Pa_GetDefaultOutputDevice))
            .transpose()?;
        let frames = params
            .frames_per_buffer
            .map_or(paFramesPerBufferUnspecified, c_ulong::from);

        let mut stream: *mut PaStream = core::ptr::null_mut();
        check(Pa_OpenStream(
            &mut stream,
            input.as_ref().map_or(core::ptr::null(), |p| p as *const _),
            output.as_ref().map_or(core::ptr::null(), |p| p as *const _),
            params.sample_rate,
            frames,
            params.flags.bits(),
            Some(callback),
            user_data,
        ))?;
        if let Err(err) = check(Pa_SetStreamFinishedCallback(stream, Some(finished))) {
            Pa_CloseStream(stream);
            return Err(err);
        }
        tracing::debug!(?input, ?output, sample_rate = params.sample_rate, "opened PortAudio stream");
        Ok(Box::new(PortAudioStream {
            stream,
            closed: false,
            _library: Arc::clone(&self.library),
        }))
    }
}

struct PortAudioStream {
    stream: *mut PaStream,
    closed: bool,
    _library: Arc<EngineLibrary>,
}

// Safety: PortAudio stream handles may be driven from any single control thread at a time.
unsafe impl Send for PortAudioStream {}

impl PortAudioStream {
    fn handle(&self) -> Result<*mut PaStream> {
        if self.closed {
            Err(ErrorCode::BadStreamPtr.into())
        } else {
            Ok(self.stream)
        }
    }
}

impl EngineStream for PortAudioStream {
    fn start(&mut self) -> Result<()> {
        check(unsafe { Pa_StartStream(self.handle()?) }).map(drop)
    }

    fn stop(&mut self) -> Result<()> {
        check(unsafe { Pa_StopStream(self.handle()?) }).map(drop)
    }

    fn abort(&mut self) -> Result<()> {
        check(unsafe { Pa_AbortStream(self.handle()?) }).map(drop)
    }

    fn close(&mut self) -> Result<()> {
        check(unsafe { Pa_CloseStream(self.handle()?) })?;
        self.closed = true;
        Ok(())
    }

    fn is_active(&self) -> Result<bool> {
        check(unsafe { Pa_IsStreamActive(self.handle()?) }).map(|active| active == 1)
    }

    fn is_stopped(&self) -> Result<bool> {
        check(unsafe { Pa_IsStreamStopped(self.handle()?) }).map(|stopped| stopped == 1)
    }

    fn cpu_load(&self) -> f64 {
        self.handle()
            .map_or(0.0, |stream| unsafe { Pa_GetStreamCpuLoad(stream) })
    }

    fn time(&self) -> f64 {
        self.handle()
            .map_or(0.0, |stream| unsafe { Pa_GetStreamTime(stream) })
    }

    fn info(&self) -> Result<StreamInfo> {
        let info = unsafe { Pa_GetStreamInfo(self.handle()?).as_ref() }
            .ok_or(EngineError::Native(ErrorCode::BadStreamPtr))?;
        Ok(StreamInfo {
            input_latency: seconds(info.inputLatency),
            output_latency: seconds(info.outputLatency),
            sample_rate: info.sampleRate,
        })
    }
}

impl Drop for PortAudioStream {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(err) = check(unsafe { Pa_CloseStream(self.stream) }) {
                tracing::warn!(%err, "failed to close PortAudio stream on drop");
            }
        }
    }
}
