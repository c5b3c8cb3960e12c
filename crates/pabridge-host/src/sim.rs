//! In-process engine that drives the trampoline pair from its own audio thread.
//!
//! Buffers follow a fixed block schedule and timing comes from a deterministic clock, so the
//! whole callback lifecycle can be exercised without audio hardware.

use core::ffi::{c_int, c_ulong, c_void};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel as channel;
use pabridge_rt::timing::seconds;
use pabridge_rt::{SampleFormat, StatusFlags, StreamLayout};
use pabridge_sys::{
    paComplete, paContinue, PaStreamCallback, PaStreamCallbackTimeInfo, PaStreamFinishedCallback,
};
use parking_lot::Mutex;

use crate::config::StreamParameters;
use crate::error::{ErrorCode, Result};
use crate::{Engine, EngineStream, StreamInfo, VersionInfo};

const DEFAULT_FRAMES_PER_BUFFER: usize = 256;
const DEFAULT_CAPTURE_LIMIT: usize = 4096;

/// One engine buffer: its frame count and the status flags reported with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedBlock {
    pub frames: usize,
    pub flags: StatusFlags,
}

impl SimulatedBlock {
    pub const fn new(frames: usize) -> Self {
        Self {
            frames,
            flags: StatusFlags::empty(),
        }
    }

    pub const fn with_flags(mut self, flags: StatusFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Content written into the input buffer before each callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSignal {
    /// Digital silence for the stream's sample format.
    Silence,
    /// Each input byte holds the low eight bits of its position in the captured byte stream.
    Counter,
    /// The given bytes, repeated.
    Pattern(Vec<u8>),
}

impl InputSignal {
    fn fill(&self, offset: u64, format: SampleFormat, bytes: &mut [u8]) {
        match self {
            Self::Silence => bytes.fill(format.silence_byte()),
            Self::Counter => {
                for (index, byte) in bytes.iter_mut().enumerate() {
                    *byte = (offset + index as u64) as u8;
                }
            }
            Self::Pattern(pattern) if pattern.is_empty() => bytes.fill(format.silence_byte()),
            Self::Pattern(pattern) => {
                let start = (offset % pattern.len() as u64) as usize;
                for (byte, value) in bytes.iter_mut().zip(pattern.iter().cycle().skip(start)) {
                    *byte = *value;
                }
            }
        }
    }
}

/// Engine behaviour outside the callback contract, for exercising the bridge's defences.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContractViolations {
    /// Extra callback invocations after the callback returned a terminal code.
    pub callbacks_after_terminal: usize,
    /// Deliver the finished notification twice.
    pub duplicate_finished: bool,
    /// Never deliver the finished notification.
    pub skip_finished: bool,
    /// Stop the stream on `close` but report failure and keep the handle open.
    pub fail_close: bool,
}

/// One buffer the engine handed to the callback, copied after the callback returned.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedBuffer {
    pub frames: usize,
    pub flags: StatusFlags,
    pub timing: PaStreamCallbackTimeInfo,
    pub input: Vec<u8>,
    pub output: Vec<u8>,
    pub result: c_int,
}

#[derive(Default)]
struct CaptureState {
    buffers: Vec<CapturedBuffer>,
    callbacks: usize,
    finished_calls: usize,
    audio_thread: Option<ThreadId>,
    finished_thread: Option<ThreadId>,
}

/// Record of everything one simulated stream did.
#[derive(Clone)]
pub struct Capture {
    state: Arc<Mutex<CaptureState>>,
    limit: usize,
}

impl Capture {
    fn new(limit: usize) -> Self {
        Self {
            state: Arc::default(),
            limit,
        }
    }

    /// Captured buffers in callback order, up to the capture limit.
    pub fn buffers(&self) -> Vec<CapturedBuffer> {
        self.state.lock().buffers.clone()
    }

    pub fn results(&self) -> Vec<c_int> {
        self.state.lock().buffers.iter().map(|buffer| buffer.result).collect()
    }

    /// Total callback invocations, including ones past the capture limit.
    pub fn callbacks(&self) -> usize {
        self.state.lock().callbacks
    }

    pub fn finished_calls(&self) -> usize {
        self.state.lock().finished_calls
    }

    pub fn audio_thread(&self) -> Option<ThreadId> {
        self.state.lock().audio_thread
    }

    pub fn finished_thread(&self) -> Option<ThreadId> {
        self.state.lock().finished_thread
    }

    fn record(&self, buffer: CapturedBuffer) {
        let mut state = self.state.lock();
        state.callbacks += 1;
        if state.buffers.len() < self.limit {
            state.buffers.push(buffer);
        }
    }

    fn note_audio_thread(&self) {
        self.state.lock().audio_thread = Some(thread::current().id());
    }

    fn note_finished(&self) {
        let mut state = self.state.lock();
        state.finished_calls += 1;
        state.finished_thread = Some(thread::current().id());
    }
}

impl core::fmt::Debug for Capture {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Capture")
            .field("buffers", &state.buffers.len())
            .field("callbacks", &state.callbacks)
            .field("finished_calls", &state.finished_calls)
            .finish()
    }
}

/// Deterministic engine with one simulated device per direction.
#[derive(Debug)]
pub struct SimulatedEngine {
    schedule: Vec<SimulatedBlock>,
    repeat: bool,
    paced: bool,
    input: InputSignal,
    devices: u32,
    capture_limit: usize,
    violations: ContractViolations,
    captures: Mutex<Vec<Capture>>,
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self {
            schedule: Vec::new(),
            repeat: false,
            paced: false,
            input: InputSignal::Silence,
            devices: 1,
            capture_limit: DEFAULT_CAPTURE_LIMIT,
            violations: ContractViolations::default(),
            captures: Mutex::new(Vec::new()),
        }
    }

    /// Buffers to deliver, in order. Without a schedule every buffer has the stream's
    /// `frames_per_buffer` frames and the schedule repeats.
    pub fn with_schedule(mut self, blocks: impl IntoIterator<Item = SimulatedBlock>) -> Self {
        self.schedule = blocks.into_iter().collect();
        self
    }

    /// Restart the schedule when it runs out instead of stopping the stream.
    pub fn repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    /// Sleep for each buffer's duration, approximating a hardware clock.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    pub fn with_input(mut self, input: InputSignal) -> Self {
        self.input = input;
        self
    }

    /// Number of addressable device indices per direction.
    pub fn with_devices(mut self, devices: u32) -> Self {
        self.devices = devices;
        self
    }

    pub fn with_capture_limit(mut self, limit: usize) -> Self {
        self.capture_limit = limit;
        self
    }

    pub fn violating(mut self, violations: ContractViolations) -> Self {
        self.violations = violations;
        self
    }

    /// Captures of every stream opened so far, in open order.
    pub fn captures(&self) -> Vec<Capture> {
        self.captures.lock().clone()
    }

    pub fn last_capture(&self) -> Option<Capture> {
        self.captures.lock().last().cloned()
    }

    fn plan(&self, params: &StreamParameters) -> Result<StreamPlan> {
        params.validate()?;
        for direction in [params.input, params.output].into_iter().flatten() {
            if direction.device.is_some_and(|device| device >= self.devices) {
                return Err(ErrorCode::InvalidDevice.into());
            }
        }

        let (schedule, repeat) = if self.schedule.is_empty() {
            let frames = params
                .frames_per_buffer
                .map_or(DEFAULT_FRAMES_PER_BUFFER, |frames| frames as usize);
            (vec![SimulatedBlock::new(frames)], true)
        } else {
            (self.schedule.clone(), self.repeat)
        };
        if schedule.iter().any(|block| block.frames == 0) {
            return Err(ErrorCode::BufferTooSmall.into());
        }

        Ok(StreamPlan {
            schedule,
            repeat,
            paced: self.paced,
            input: self.input.clone(),
            layout: params.layout(),
            sample_rate: params.sample_rate,
            input_latency: params.input.map_or(0.0, |input| input.suggested_latency),
            output_latency: params.output.map_or(0.0, |output| output.suggested_latency),
            violations: self.violations,
        })
    }
}

impl Engine for SimulatedEngine {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn version(&self) -> VersionInfo {
        VersionInfo {
            major: 19,
            minor: 7,
            sub_minor: 0,
            control_revision: "simulated".into(),
            text: format!("pabridge simulated engine {}", env!("CARGO_PKG_VERSION")),
        }
    }

    unsafe fn open(
        &self,
        params: &StreamParameters,
        callback: PaStreamCallback,
        finished: PaStreamFinishedCallback,
        user_data: *mut c_void,
    ) -> Result<Box<dyn EngineStream>> {
        let plan = Arc::new(self.plan(params)?);
        let capture = Capture::new(self.capture_limit);
        self.captures.lock().push(capture.clone());
        tracing::debug!(
            layout = ?plan.layout,
            sample_rate = plan.sample_rate,
            blocks = plan.schedule.len(),
            repeat = plan.repeat,
            "opened simulated stream"
        );
        Ok(Box::new(SimulatedStream {
            plan,
            shared: Arc::new(Shared {
                request: AtomicU8::new(RUN),
                active: AtomicBool::new(false),
                position: AtomicU64::new(0),
                cpu_load: AtomicU64::new(0),
                capture,
            }),
            callback,
            finished,
            user_data: UserData(user_data),
            state: State::Stopped,
            audio: None,
            lifecycle: None,
        }))
    }
}

struct StreamPlan {
    schedule: Vec<SimulatedBlock>,
    repeat: bool,
    paced: bool,
    input: InputSignal,
    layout: StreamLayout,
    sample_rate: f64,
    input_latency: f64,
    output_latency: f64,
    violations: ContractViolations,
}

impl StreamPlan {
    fn block_duration(&self, frames: usize) -> Duration {
        Duration::from_secs_f64(frames as f64 / self.sample_rate)
    }

    fn timing(&self, position: u64) -> PaStreamCallbackTimeInfo {
        let now = position as f64 / self.sample_rate;
        PaStreamCallbackTimeInfo {
            inputBufferAdcTime: if self.layout.input_channels > 0 {
                now - self.input_latency
            } else {
                0.0
            },
            currentTime: now,
            outputBufferDacTime: if self.layout.output_channels > 0 {
                now + self.output_latency
            } else {
                0.0
            },
        }
    }
}

const RUN: u8 = 0;
const STOP: u8 = 1;
const ABORT: u8 = 2;

struct Shared {
    request: AtomicU8,
    active: AtomicBool,
    position: AtomicU64,
    cpu_load: AtomicU64,
    capture: Capture,
}

#[derive(Clone, Copy)]
struct UserData(*mut c_void);

// Safety: the pointer is an opaque token handed back to the callbacks, never dereferenced here.
unsafe impl Send for UserData {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Stopped,
    Running,
    Closed,
}

struct SimulatedStream {
    plan: Arc<StreamPlan>,
    shared: Arc<Shared>,
    callback: PaStreamCallback,
    finished: PaStreamFinishedCallback,
    user_data: UserData,
    state: State,
    audio: Option<JoinHandle<()>>,
    lifecycle: Option<JoinHandle<()>>,
}

/// Sample storage aligned for every sample type.
#[derive(Default)]
struct AlignedBuffer(Vec<u64>);

impl AlignedBuffer {
    fn prepare(&mut self, len: usize, fill: u8) -> &mut [u8] {
        self.0.clear();
        self.0.resize(len.div_ceil(8), 0);
        let bytes = &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.0)[..len];
        bytes.fill(fill);
        bytes
    }
}

fn run_audio(
    plan: Arc<StreamPlan>,
    shared: Arc<Shared>,
    callback: PaStreamCallback,
    user_data: UserData,
    done: channel::Sender<()>,
) {
    shared.capture.note_audio_thread();
    let layout = plan.layout;
    let format = layout.format;
    let mut input = AlignedBuffer::default();
    let mut output = AlignedBuffer::default();
    let mut input_offset = 0u64;
    let mut position = shared.position.load(Ordering::Acquire);
    let mut extra_calls = 0usize;
    let mut terminal = false;

    let passes = if plan.repeat { usize::MAX } else { 1 };
    let blocks = (0..passes).flat_map(|_| plan.schedule.iter().copied());

    for block in blocks {
        if terminal {
            if extra_calls == plan.violations.callbacks_after_terminal {
                break;
            }
            extra_calls += 1;
        } else if shared.request.load(Ordering::Acquire) != RUN {
            break;
        }

        let input_len = block.frames * layout.input_frame_bytes();
        let input_bytes = input.prepare(input_len, format.silence_byte());
        plan.input.fill(input_offset, format, input_bytes);
        input_offset += input_len as u64;
        let input_ptr = if layout.input_channels > 0 {
            input_bytes.as_ptr().cast::<c_void>()
        } else {
            core::ptr::null()
        };
        let captured_input = input_bytes.to_vec();

        let output_bytes = output.prepare(block.frames * layout.output_frame_bytes(), 0);
        let output_ptr = if layout.output_channels > 0 {
            output_bytes.as_mut_ptr().cast::<c_void>()
        } else {
            core::ptr::null_mut()
        };

        let timing = plan.timing(position);
        let started = Instant::now();
        // Safety: the buffers hold `block.frames` frames of the negotiated layout and outlive
        // the call; the caller of `Engine::open` vouched for the callback and user data.
        let result = unsafe {
            callback(
                input_ptr,
                output_ptr,
                block.frames as c_ulong,
                &timing,
                block.flags.bits(),
                user_data.0,
            )
        };
        let elapsed = started.elapsed();
        let budget = plan.block_duration(block.frames);
        let load = elapsed.as_secs_f64() / budget.as_secs_f64().max(f64::EPSILON);
        shared.cpu_load.store(load.to_bits(), Ordering::Relaxed);

        shared.capture.record(CapturedBuffer {
            frames: block.frames,
            flags: block.flags,
            timing,
            input: captured_input,
            output: output_bytes.to_vec(),
            result,
        });
        position += block.frames as u64;
        shared.position.store(position, Ordering::Release);

        if result != paContinue {
            if result != paComplete {
                shared.request.store(ABORT, Ordering::Release);
            }
            terminal = true;
        }
        if plan.paced && !terminal {
            if let Some(rest) = budget.checked_sub(elapsed) {
                thread::sleep(rest);
            }
        }
    }

    shared.active.store(false, Ordering::Release);
    let _ = done.send(());
}

fn run_lifecycle(
    shared: Arc<Shared>,
    finished: PaStreamFinishedCallback,
    user_data: UserData,
    deliveries: usize,
    done: channel::Receiver<()>,
) {
    if done.recv().is_err() {
        return;
    }
    for _ in 0..deliveries {
        shared.capture.note_finished();
        // Safety: all callback invocations for this stream have returned.
        unsafe { finished(user_data.0) };
    }
}

impl SimulatedStream {
    fn ensure_open(&self) -> Result<()> {
        if self.state == State::Closed {
            return Err(ErrorCode::BadStreamPtr.into());
        }
        Ok(())
    }

    fn halt(&mut self, request: u8) -> Result<()> {
        self.ensure_open()?;
        if self.state == State::Stopped {
            return Err(ErrorCode::StreamIsStopped.into());
        }
        let _ = self
            .shared
            .request
            .compare_exchange(RUN, request, Ordering::AcqRel, Ordering::Acquire);
        let audio = self.audio.take().map(JoinHandle::join);
        let lifecycle = self.lifecycle.take().map(JoinHandle::join);
        self.state = State::Stopped;
        if matches!(audio, Some(Err(_))) || matches!(lifecycle, Some(Err(_))) {
            tracing::error!("simulated engine thread panicked");
            return Err(ErrorCode::InternalError.into());
        }
        Ok(())
    }
}

impl EngineStream for SimulatedStream {
    fn start(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.state == State::Running {
            return Err(ErrorCode::StreamIsNotStopped.into());
        }
        self.shared.request.store(RUN, Ordering::Release);
        self.shared.active.store(true, Ordering::Release);

        let (done_tx, done_rx) = channel::bounded(1);
        let audio = {
            let plan = Arc::clone(&self.plan);
            let shared = Arc::clone(&self.shared);
            let callback = self.callback;
            let user_data = self.user_data;
            thread::Builder::new()
                .name("pabridge-sim-audio".into())
                .spawn(move || run_audio(plan, shared, callback, user_data, done_tx))
        };
        let audio = match audio {
            Ok(handle) => handle,
            Err(err) => {
                self.shared.active.store(false, Ordering::Release);
                tracing::error!(%err, "failed to spawn simulated audio thread");
                return Err(ErrorCode::InsufficientMemory.into());
            }
        };

        let lifecycle = {
            let shared = Arc::clone(&self.shared);
            let finished = self.finished;
            let user_data = self.user_data;
            let deliveries = match self.plan.violations {
                ContractViolations { skip_finished: true, .. } => 0,
                ContractViolations { duplicate_finished: true, .. } => 2,
                _ => 1,
            };
            thread::Builder::new()
                .name("pabridge-sim-lifecycle".into())
                .spawn(move || run_lifecycle(shared, finished, user_data, deliveries, done_rx))
        };
        self.audio = Some(audio);
        self.state = State::Running;
        match lifecycle {
            Ok(handle) => {
                self.lifecycle = Some(handle);
                Ok(())
            }
            Err(err) => {
                tracing::error!(%err, "failed to spawn simulated lifecycle thread");
                let _ = self.halt(ABORT);
                Err(ErrorCode::InsufficientMemory.into())
            }
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.halt(STOP)
    }

    fn abort(&mut self) -> Result<()> {
        self.halt(ABORT)
    }

    fn close(&mut self) -> Result<()> {
        match self.state {
            State::Closed => return Err(ErrorCode::BadStreamPtr.into()),
            State::Running => self.halt(ABORT)?,
            State::Stopped => {}
        }
        if self.plan.violations.fail_close {
            tracing::debug!("simulated stream refusing to close");
            return Err(ErrorCode::InternalError.into());
        }
        self.state = State::Closed;
        tracing::debug!(callbacks = self.shared.capture.callbacks(), "closed simulated stream");
        Ok(())
    }

    fn is_active(&self) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.state == State::Running && self.shared.active.load(Ordering::Acquire))
    }

    fn is_stopped(&self) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.state == State::Stopped)
    }

    fn cpu_load(&self) -> f64 {
        f64::from_bits(self.shared.cpu_load.load(Ordering::Relaxed))
    }

    fn time(&self) -> f64 {
        self.shared.position.load(Ordering::Acquire) as f64 / self.plan.sample_rate
    }

    fn info(&self) -> Result<StreamInfo> {
        self.ensure_open()?;
        Ok(StreamInfo {
            input_latency: seconds(self.plan.input_latency),
            output_latency: seconds(self.plan.output_latency),
            sample_rate: self.plan.sample_rate,
        })
    }
}

impl Drop for SimulatedStream {
    fn drop(&mut self) {
        if self.state == State::Running {
            let _ = self.halt(ABORT);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn counter_and_pattern_inputs_continue_across_buffers() {
        let mut bytes = [0u8; 4];
        InputSignal::Counter.fill(254, SampleFormat::Int16, &mut bytes);
        assert_eq!(bytes, [254, 255, 0, 1]);

        let pattern = InputSignal::Pattern(vec![1, 2, 3]);
        pattern.fill(4, SampleFormat::Int8, &mut bytes);
        assert_eq!(bytes, [2, 3, 1, 2]);

        InputSignal::Silence.fill(0, SampleFormat::UInt8, &mut bytes);
        assert_eq!(bytes, [0x80; 4]);
    }

    #[test]
    fn clock_derives_timing_from_position() {
        let engine = SimulatedEngine::new();
        let mut params = StreamParameters::duplex(1, 2, 1_000.0, SampleFormat::Float32);
        if let Some(input) = params.input.as_mut() {
            input.suggested_latency = 0.25;
        }
        if let Some(output) = params.output.as_mut() {
            output.suggested_latency = 0.5;
        }
        let plan = engine.plan(&params).expect("plan");
        let timing = plan.timing(2_000);
        assert_eq!(timing.currentTime, 2.0);
        assert_eq!(timing.inputBufferAdcTime, 1.75);
        assert_eq!(timing.outputBufferDacTime, 2.5);
        assert_eq!(plan.block_duration(250), Duration::from_millis(250));
    }

    #[test]
    fn open_validates_like_the_native_engine() {
        let engine = SimulatedEngine::new().with_devices(2);
        let open = |params: StreamParameters| {
            engine
                .plan(&params)
                .err()
                .and_then(|err| err.code())
        };
        let mut params = StreamParameters::output(2, 48_000.0, SampleFormat::Float32);
        assert_eq!(open(params.clone()), None);
        if let Some(output) = params.output.as_mut() {
            output.device = Some(2);
        }
        assert_eq!(open(params), Some(ErrorCode::InvalidDevice));
        assert_eq!(
            open(StreamParameters::output(2, -1.0, SampleFormat::Float32)),
            Some(ErrorCode::InvalidSampleRate)
        );

        let zero_block = SimulatedEngine::new().with_schedule([SimulatedBlock::new(0)]);
        assert!(matches!(
            zero_block.plan(&StreamParameters::default()).err().and_then(|err| err.code()),
            Some(ErrorCode::BufferTooSmall)
        ));
    }

    #[test]
    fn unscheduled_streams_repeat_their_buffer_size() {
        let engine = SimulatedEngine::new();
        let plan = engine
            .plan(&StreamParameters::default().with_frames_per_buffer(Some(64)))
            .expect("plan");
        assert_eq!(plan.schedule, vec![SimulatedBlock::new(64)]);
        assert!(plan.repeat);
        let plan = engine
            .plan(&StreamParameters::default().with_frames_per_buffer(None))
            .expect("plan");
        assert_eq!(plan.schedule, vec![SimulatedBlock::new(DEFAULT_FRAMES_PER_BUFFER)]);
    }
}
