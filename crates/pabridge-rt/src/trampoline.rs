//! The `extern "C"` entry points the engine calls.
//!
//! [`stream_callback`] runs on the engine's audio thread: no allocation, no locks, no logging.
//! [`stream_finished`] runs once on a lifecycle thread and may log.

use core::ffi::{c_int, c_ulong, c_void};

use pabridge_sys::{PaStreamCallbackFlags, PaStreamCallbackTimeInfo};

use crate::buffer::{InputView, OutputView, StreamBuffer};
use crate::callback::Disposition;
use crate::context::CallbackContext;
use crate::diagnostics;
use crate::registry::{self, StreamToken};
use crate::timing::{StatusFlags, TimingSnapshot};

/// Per-buffer trampoline registered with the engine.
///
/// Resolves `user_data` to its [`CallbackContext`], wraps the native buffers and timing, runs the
/// stream callback and returns the engine control code. An unknown token is a no-op returning
/// `paAbort`.
///
/// # Safety
/// Must only be called by the engine with buffers sized for `frame_count` frames of the layout
/// the token was registered with.
pub unsafe extern "C" fn stream_callback(
    input: *const c_void,
    output: *mut c_void,
    frame_count: c_ulong,
    time_info: *const PaStreamCallbackTimeInfo,
    status_flags: PaStreamCallbackFlags,
    user_data: *mut c_void,
) -> c_int {
    let context = match StreamToken::from_user_data(user_data)
        .and_then(|token| registry::global().resolve(token))
    {
        Some(context) => context,
        None => {
            diagnostics::orphan_callback();
            return Disposition::Abort.to_native();
        }
    };
    dispatch(context, input, output, frame_count, time_info, status_flags).to_native()
}

/// Body of [`stream_callback`] once the context is known.
///
/// # Safety
/// Same buffer requirements as [`stream_callback`]; calls for one context must not overlap.
#[inline]
pub unsafe fn dispatch(
    context: &CallbackContext,
    input: *const c_void,
    output: *mut c_void,
    frame_count: c_ulong,
    time_info: *const PaStreamCallbackTimeInfo,
    status_flags: PaStreamCallbackFlags,
) -> Disposition {
    let Ok(frames) = usize::try_from(frame_count) else {
        return context.reject();
    };
    let layout = context.layout();
    let input_view = InputView::from_raw(input, frames, layout.input_channels, layout.format);
    let output_view = OutputView::from_raw(output, frames, layout.output_channels, layout.format);
    // A buffer the engine passed but that cannot be addressed must not reach the callback.
    if (input_view.is_none() && !input.is_null() && layout.input_channels > 0)
        || (output_view.is_none() && !output.is_null() && layout.output_channels > 0)
    {
        return context.reject();
    }
    let mut buffer = StreamBuffer {
        input: input_view,
        output: output_view,
        frames,
        timing: TimingSnapshot::from_raw(time_info),
        flags: StatusFlags::from_bits_retain(status_flags),
    };
    context.invoke(&mut buffer)
}

/// Finished-notification relay registered with the engine.
///
/// Delivers the stream's finished handler exactly once. Unknown tokens and repeated calls are
/// logged and otherwise ignored.
///
/// # Safety
/// Must only be called by the engine, after the last [`stream_callback`] for `user_data`.
pub unsafe extern "C" fn stream_finished(user_data: *mut c_void) {
    let Some(token) = StreamToken::from_user_data(user_data) else {
        diagnostics::orphan_finish();
        tracing::error!("stream finished relay invoked without user data");
        return;
    };
    let Some(context) = registry::global().resolve(token) else {
        diagnostics::orphan_finish();
        tracing::error!(?token, "stream finished relay invoked for an unregistered stream");
        return;
    };
    if context.relay_finished() {
        tracing::trace!(?token, reason = ?context.finish_reason(), "stream finished");
    } else {
        diagnostics::duplicate_finish();
        tracing::error!(?token, "stream finished relay invoked more than once");
    }
}
