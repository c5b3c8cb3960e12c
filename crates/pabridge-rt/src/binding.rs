//! Signature and layout checks binding the trampoline pair to the engine ABI.
//!
//! The typed constants below fail the build if either entry point drifts from the engine's
//! function-pointer types. [`ensure_bindings`] repeats the layout checks at startup so a
//! mismatched engine build is reported before the first stream opens.

use core::ffi::{c_int, c_ulong};
use core::mem::{align_of, size_of};

use once_cell::sync::OnceCell;
use pabridge_sys::{
    paAbort, paComplete, paContinue, paInputOverflow, paInputUnderflow, paOutputOverflow,
    paOutputUnderflow, paPrimingOutput, PaStreamCallback, PaStreamCallbackFlags,
    PaStreamCallbackTimeInfo, PaStreamFinishedCallback,
};

use crate::callback::Disposition;
use crate::format::SampleFormat;
use crate::timing::{StatusFlags, TimingSnapshot};
use crate::trampoline::{stream_callback, stream_finished};

/// The trampoline, typed as the engine expects to receive it.
pub const STREAM_CALLBACK: PaStreamCallback = stream_callback;
/// The finished relay, typed as the engine expects to receive it.
pub const STREAM_FINISHED_CALLBACK: PaStreamFinishedCallback = stream_finished;

const _: () = {
    assert!(Disposition::Continue.to_native() == paContinue);
    assert!(Disposition::Complete.to_native() == paComplete);
    assert!(Disposition::Abort.to_native() == paAbort);
    assert!(StatusFlags::INPUT_UNDERFLOW.bits() == paInputUnderflow);
    assert!(StatusFlags::INPUT_OVERFLOW.bits() == paInputOverflow);
    assert!(StatusFlags::OUTPUT_UNDERFLOW.bits() == paOutputUnderflow);
    assert!(StatusFlags::OUTPUT_OVERFLOW.bits() == paOutputOverflow);
    assert!(StatusFlags::PRIMING_OUTPUT.bits() == paPrimingOutput);
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    #[error("{name} is {found} bytes, the engine expects {expected}")]
    Size {
        name: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{name} is aligned to {found} bytes, the engine expects {expected}")]
    Align {
        name: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("disposition {disposition:?} maps to control code {native}, which does not round-trip")]
    ControlCode {
        disposition: Disposition,
        native: c_int,
    },
    #[error("sample format {format:?} maps to native bits {native:#x}, which do not round-trip")]
    SampleFormat { format: SampleFormat, native: u64 },
    #[error("timing snapshot does not round-trip through the native layout")]
    Timing,
}

static CHECKED: OnceCell<Result<(), BindingError>> = OnceCell::new();

/// Runs the startup binding check once per process and returns its cached outcome.
///
/// Callers should abort initialisation on `Err`.
pub fn ensure_bindings() -> Result<(), BindingError> {
    CHECKED
        .get_or_init(|| {
            let outcome = verify();
            match &outcome {
                Ok(()) => tracing::debug!("engine callback bindings verified"),
                Err(err) => tracing::error!(%err, "engine callback bindings do not match"),
            }
            outcome
        })
        .clone()
}

fn expect_size<T>(name: &'static str, expected: usize) -> Result<(), BindingError> {
    let found = size_of::<T>();
    if found == expected {
        Ok(())
    } else {
        Err(BindingError::Size {
            name,
            expected,
            found,
        })
    }
}

fn expect_align<T>(name: &'static str, expected: usize) -> Result<(), BindingError> {
    let found = align_of::<T>();
    if found == expected {
        Ok(())
    } else {
        Err(BindingError::Align {
            name,
            expected,
            found,
        })
    }
}

fn verify() -> Result<(), BindingError> {
    expect_size::<PaStreamCallbackTimeInfo>("PaStreamCallbackTimeInfo", 3 * size_of::<f64>())?;
    expect_align::<PaStreamCallbackTimeInfo>("PaStreamCallbackTimeInfo", align_of::<f64>())?;
    expect_size::<PaStreamCallbackFlags>("PaStreamCallbackFlags", size_of::<c_ulong>())?;
    expect_size::<Option<PaStreamCallback>>("PaStreamCallback", size_of::<usize>())?;
    expect_size::<Option<PaStreamFinishedCallback>>("PaStreamFinishedCallback", size_of::<usize>())?;

    for disposition in [Disposition::Continue, Disposition::Complete, Disposition::Abort] {
        let native = disposition.to_native();
        if Disposition::from_native(native) != Some(disposition) {
            return Err(BindingError::ControlCode {
                disposition,
                native,
            });
        }
    }

    for format in SampleFormat::ALL {
        let native = format.to_native();
        if SampleFormat::from_native(native) != Ok(format) {
            return Err(BindingError::SampleFormat {
                format,
                native: u64::from(native),
            });
        }
    }

    let reference = PaStreamCallbackTimeInfo {
        inputBufferAdcTime: 1.0,
        currentTime: 2.0,
        outputBufferDacTime: 3.0,
    };
    // Safety: `reference` is a live, aligned value.
    let snapshot = unsafe { TimingSnapshot::from_raw(&reference) };
    if snapshot.input_adc_time != 1.0 || snapshot.current_time != 2.0 || snapshot.output_dac_time != 3.0 {
        return Err(BindingError::Timing);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bindings_verify_and_are_cached() {
        assert_eq!(ensure_bindings(), Ok(()));
        assert_eq!(ensure_bindings(), Ok(()));
    }

    #[test]
    fn size_mismatch_is_reported() {
        assert_eq!(
            expect_size::<u16>("u16", 4),
            Err(BindingError::Size {
                name: "u16",
                expected: 4,
                found: 2
            })
        );
    }
}
