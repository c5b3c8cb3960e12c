//! Per-stream state shared between the audio thread and the control thread.

use std::cell::UnsafeCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::buffer::{StreamBuffer, StreamLayout};
use crate::callback::{Disposition, FinishReason, FinishedHandler, StreamCallback};
use crate::fault::{CallbackFault, FaultSlot};
use crate::registry::StreamToken;
use crate::timing::StatusFlags;

const RUNNING: u8 = 0;
const COMPLETED: u8 = 1;
const ABORTED: u8 = 2;
const FAULTED: u8 = 3;

/// Counters maintained by the dispatch path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub invocations: u64,
    pub frames: u64,
    pub input_underflows: u64,
    pub input_overflows: u64,
    pub output_underflows: u64,
    pub output_overflows: u64,
    pub priming_buffers: u64,
}

#[derive(Default)]
struct StatCounters {
    invocations: AtomicU64,
    frames: AtomicU64,
    input_underflows: AtomicU64,
    input_overflows: AtomicU64,
    output_underflows: AtomicU64,
    output_overflows: AtomicU64,
    priming_buffers: AtomicU64,
}

impl StatCounters {
    #[inline]
    fn record(&self, frames: usize, flags: StatusFlags) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        self.frames.fetch_add(frames as u64, Ordering::Relaxed);
        if flags.is_empty() {
            return;
        }
        let counters = [
            (StatusFlags::INPUT_UNDERFLOW, &self.input_underflows),
            (StatusFlags::INPUT_OVERFLOW, &self.input_overflows),
            (StatusFlags::OUTPUT_UNDERFLOW, &self.output_underflows),
            (StatusFlags::OUTPUT_OVERFLOW, &self.output_overflows),
            (StatusFlags::PRIMING_OUTPUT, &self.priming_buffers),
        ];
        for (flag, counter) in counters {
            if flags.contains(flag) {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn snapshot(&self) -> StreamStats {
        StreamStats {
            invocations: self.invocations.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            input_underflows: self.input_underflows.load(Ordering::Relaxed),
            input_overflows: self.input_overflows.load(Ordering::Relaxed),
            output_underflows: self.output_underflows.load(Ordering::Relaxed),
            output_overflows: self.output_overflows.load(Ordering::Relaxed),
            priming_buffers: self.priming_buffers.load(Ordering::Relaxed),
        }
    }
}

/// Associates one open stream with its callback, finished handler and fault slot.
///
/// The audio thread only touches the callback cell, the latch, the counters and the fault slot,
/// none of which block. The finished handler lives behind a lock that only the relay and the
/// control thread take.
pub struct CallbackContext {
    token: AtomicUsize,
    layout: StreamLayout,
    callback: UnsafeCell<Box<dyn StreamCallback>>,
    latch: AtomicU8,
    fault: FaultSlot,
    stats: StatCounters,
    relayed: AtomicBool,
    finished: Mutex<FinishedState>,
    finished_cv: Condvar,
}

struct FinishedState {
    handler: Option<FinishedHandler>,
    reason: Option<FinishReason>,
}

// Safety: the callback cell is only accessed from `invoke`, which the engine never runs
// concurrently with itself for one stream. Everything else is atomic or locked.
unsafe impl Sync for CallbackContext {}

impl CallbackContext {
    pub fn new(
        layout: StreamLayout,
        callback: Box<dyn StreamCallback>,
        finished: Option<FinishedHandler>,
    ) -> Self {
        Self {
            token: AtomicUsize::new(0),
            layout,
            callback: UnsafeCell::new(callback),
            latch: AtomicU8::new(RUNNING),
            fault: FaultSlot::new(),
            stats: StatCounters::default(),
            relayed: AtomicBool::new(false),
            finished: Mutex::new(FinishedState {
                handler: finished,
                reason: None,
            }),
            finished_cv: Condvar::new(),
        }
    }

    pub fn layout(&self) -> StreamLayout {
        self.layout
    }

    /// Token assigned at registration, if any.
    pub fn token(&self) -> Option<StreamToken> {
        StreamToken::from_raw(self.token.load(Ordering::Acquire))
    }

    pub(crate) fn claim_token(&self, token: StreamToken) -> bool {
        self.token
            .compare_exchange(0, token.into_raw(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release_token(&self) {
        self.token.store(0, Ordering::Release);
    }

    pub fn stats(&self) -> StreamStats {
        self.stats.snapshot()
    }

    /// Terminal disposition returned by (or forced on behalf of) the callback, if any.
    pub fn latched(&self) -> Option<Disposition> {
        match self.latch.load(Ordering::Acquire) {
            COMPLETED => Some(Disposition::Complete),
            ABORTED | FAULTED => Some(Disposition::Abort),
            _ => None,
        }
    }

    pub fn has_fault(&self) -> bool {
        self.fault.is_set()
    }

    /// Removes the recorded callback fault. Meant for the control thread after the stream stopped.
    pub fn take_fault(&self) -> Option<CallbackFault> {
        self.fault.take()
    }

    /// True once the finished relay has delivered its notification.
    pub fn is_finished(&self) -> bool {
        self.finished.lock().reason.is_some()
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finished.lock().reason
    }

    /// Blocks the calling (non-real-time) thread until the relay has run or `timeout` elapses.
    pub fn wait_finished(&self, timeout: Duration) -> Option<FinishReason> {
        let mut state = self.finished.lock();
        if state.reason.is_none() {
            let _ = self
                .finished_cv
                .wait_while_for(&mut state, |state| state.reason.is_none(), timeout);
        }
        state.reason
    }

    /// Runs the callback for one buffer. Audio thread only.
    pub(crate) fn invoke(&self, buffer: &mut StreamBuffer<'_>) -> Disposition {
        if let Some(latched) = self.latched() {
            return latched;
        }
        self.stats.record(buffer.frames, buffer.flags);

        // Safety: the engine serialises invocations for a stream, so this is the only live
        // reference to the callback.
        let callback = unsafe { &mut *self.callback.get() };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback.process(buffer)));

        match outcome {
            Ok(Ok(Disposition::Continue)) => Disposition::Continue,
            Ok(Ok(Disposition::Complete)) => {
                self.latch.store(COMPLETED, Ordering::Release);
                Disposition::Complete
            }
            Ok(Ok(Disposition::Abort)) => {
                self.latch.store(ABORTED, Ordering::Release);
                Disposition::Abort
            }
            Ok(Err(err)) => self.fault(CallbackFault::Error(err)),
            Err(payload) => self.fault(CallbackFault::from_panic(payload)),
        }
    }

    /// Aborts without running the callback, keeping any disposition latched earlier.
    pub(crate) fn reject(&self) -> Disposition {
        match self
            .latch
            .compare_exchange(RUNNING, ABORTED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Disposition::Abort,
            Err(_) => self.latched().unwrap_or(Disposition::Abort),
        }
    }

    fn fault(&self, fault: CallbackFault) -> Disposition {
        self.fault.record(fault);
        self.latch.store(FAULTED, Ordering::Release);
        Disposition::Abort
    }

    fn reason(&self) -> FinishReason {
        match self.latch.load(Ordering::Acquire) {
            COMPLETED => FinishReason::Completed,
            ABORTED => FinishReason::Aborted,
            FAULTED => FinishReason::Faulted,
            _ => FinishReason::Stopped,
        }
    }

    /// Delivers the finished notification. Returns `false` for a duplicate relay.
    pub(crate) fn relay_finished(&self) -> bool {
        if self.relayed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let reason = self.reason();
        let handler = self.finished.lock().handler.take();
        if let Some(handler) = handler {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(reason))).is_err() {
                tracing::error!(?reason, "stream finished handler panicked");
            }
        }
        self.finished.lock().reason = Some(reason);
        self.finished_cv.notify_all();
        true
    }
}

impl core::fmt::Debug for CallbackContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CallbackContext")
            .field("token", &self.token())
            .field("layout", &self.layout)
            .field("latched", &self.latched())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
