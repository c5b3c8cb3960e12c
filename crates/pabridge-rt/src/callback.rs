//! The managed side of the bridge: stream callbacks and their dispositions.

use core::ffi::c_int;

use pabridge_sys::{paAbort, paComplete, paContinue};

use crate::buffer::StreamBuffer;

/// What the stream should do after the current buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Keep invoking the callback.
    Continue,
    /// Play out this buffer, then finish.
    Complete,
    /// Finish as soon as possible; remaining output is undefined.
    Abort,
}

impl Disposition {
    pub const fn to_native(self) -> c_int {
        match self {
            Self::Continue => paContinue,
            Self::Complete => paComplete,
            Self::Abort => paAbort,
        }
    }

    #[allow(non_upper_case_globals)]
    pub const fn from_native(code: c_int) -> Option<Self> {
        match code {
            paContinue => Some(Self::Continue),
            paComplete => Some(Self::Complete),
            paAbort => Some(Self::Abort),
            _ => None,
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Continue)
    }
}

/// Why a stream stopped, as seen by the finished handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FinishReason {
    /// The callback returned [`Disposition::Complete`].
    Completed,
    /// The callback returned [`Disposition::Abort`].
    Aborted,
    /// The callback failed and the bridge aborted the stream on its behalf.
    Faulted,
    /// The stream was stopped or aborted through the engine's control surface.
    Stopped,
}

/// Runs on the engine's audio thread once per buffer.
///
/// Implementations must not block, allocate or perform I/O on the success path; their execution
/// time is charged against the hardware buffer deadline.
pub trait StreamCallback: Send {
    fn process(&mut self, buffer: &mut StreamBuffer<'_>) -> anyhow::Result<Disposition>;
}

impl StreamCallback for Box<dyn StreamCallback> {
    fn process(&mut self, buffer: &mut StreamBuffer<'_>) -> anyhow::Result<Disposition> {
        (**self).process(buffer)
    }
}

/// Closure-backed [`StreamCallback`], see [`from_fn`].
pub struct FnCallback<F>(F);

impl<F> StreamCallback for FnCallback<F>
where
    F: FnMut(&mut StreamBuffer<'_>) -> anyhow::Result<Disposition> + Send,
{
    fn process(&mut self, buffer: &mut StreamBuffer<'_>) -> anyhow::Result<Disposition> {
        (self.0)(buffer)
    }
}

/// Wraps a closure as a stream callback.
pub fn from_fn<F>(f: F) -> FnCallback<F>
where
    F: FnMut(&mut StreamBuffer<'_>) -> anyhow::Result<Disposition> + Send,
{
    FnCallback(f)
}

/// One-shot notification delivered after the stream has fully stopped.
pub type FinishedHandler = Box<dyn FnOnce(FinishReason) + Send>;
