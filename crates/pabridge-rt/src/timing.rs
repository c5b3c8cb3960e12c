//! Timing metadata and status flags copied out of each engine invocation.

use core::fmt;
use core::ops::{BitOr, BitOrAssign};
use std::time::Duration;

use pabridge_sys::{
    paInputOverflow, paInputUnderflow, paOutputOverflow, paOutputUnderflow, paPrimingOutput,
    PaStreamCallbackFlags, PaStreamCallbackTimeInfo, PaTime,
};

/// Hardware timestamps for one buffer, in seconds on the engine's stream clock.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimingSnapshot {
    /// Time the first input sample was captured at the ADC.
    pub input_adc_time: f64,
    /// Stream time when the callback was invoked.
    pub current_time: f64,
    /// Time the first output sample will reach the DAC.
    pub output_dac_time: f64,
}

impl TimingSnapshot {
    /// Copies the engine-supplied structure. A null pointer yields a zeroed snapshot.
    ///
    /// # Safety
    /// A non-null `ptr` must point to a readable `PaStreamCallbackTimeInfo`.
    pub unsafe fn from_raw(ptr: *const PaStreamCallbackTimeInfo) -> Self {
        match ptr.as_ref() {
            Some(info) => Self::from_native(info),
            None => Self::default(),
        }
    }

    pub const fn from_native(info: &PaStreamCallbackTimeInfo) -> Self {
        Self {
            input_adc_time: info.inputBufferAdcTime,
            current_time: info.currentTime,
            output_dac_time: info.outputBufferDacTime,
        }
    }

    pub const fn to_native(&self) -> PaStreamCallbackTimeInfo {
        PaStreamCallbackTimeInfo {
            inputBufferAdcTime: self.input_adc_time,
            currentTime: self.current_time,
            outputBufferDacTime: self.output_dac_time,
        }
    }

    /// How far ahead of the stream clock this buffer will be heard.
    pub fn output_latency(&self) -> Duration {
        seconds(self.output_dac_time - self.current_time)
    }

    /// How long ago, relative to the stream clock, this buffer was captured.
    pub fn input_latency(&self) -> Duration {
        seconds(self.current_time - self.input_adc_time)
    }
}

/// Converts engine seconds into a `Duration`, clamping negative or non-finite values to zero.
pub fn seconds(time: PaTime) -> Duration {
    if time.is_finite() && time > 0.0 {
        Duration::from_secs_f64(time)
    } else {
        Duration::ZERO
    }
}

/// Anomalies the engine reports for one buffer. Bits are passed through verbatim.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StatusFlags(PaStreamCallbackFlags);

impl StatusFlags {
    pub const INPUT_UNDERFLOW: Self = Self(paInputUnderflow);
    pub const INPUT_OVERFLOW: Self = Self(paInputOverflow);
    pub const OUTPUT_UNDERFLOW: Self = Self(paOutputUnderflow);
    pub const OUTPUT_OVERFLOW: Self = Self(paOutputOverflow);
    pub const PRIMING_OUTPUT: Self = Self(paPrimingOutput);

    const NAMED: [(Self, &'static str); 5] = [
        (Self::INPUT_UNDERFLOW, "INPUT_UNDERFLOW"),
        (Self::INPUT_OVERFLOW, "INPUT_OVERFLOW"),
        (Self::OUTPUT_UNDERFLOW, "OUTPUT_UNDERFLOW"),
        (Self::OUTPUT_OVERFLOW, "OUTPUT_OVERFLOW"),
        (Self::PRIMING_OUTPUT, "PRIMING_OUTPUT"),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    /// Keeps unknown bits so the engine's value survives a round trip untouched.
    pub const fn from_bits_retain(bits: PaStreamCallbackFlags) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> PaStreamCallbackFlags {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// True when any under/overflow bit is set.
    pub const fn is_xrun(self) -> bool {
        self.intersects(Self(
            paInputUnderflow | paInputOverflow | paOutputUnderflow | paOutputOverflow,
        ))
    }
}

impl BitOr for StatusFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for StatusFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for StatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("StatusFlags(empty)");
        }
        f.write_str("StatusFlags(")?;
        let mut rest = self.0;
        let mut first = true;
        for (flag, name) in Self::NAMED {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                rest &= !flag.0;
                first = false;
            }
        }
        if rest != 0 {
            if !first {
                f.write_str(" | ")?;
            }
            write!(f, "{rest:#x}")?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_copies_native_fields() {
        let native = PaStreamCallbackTimeInfo {
            inputBufferAdcTime: 1.25,
            currentTime: 1.5,
            outputBufferDacTime: 1.75,
        };
        let snapshot = unsafe { TimingSnapshot::from_raw(&native) };
        assert_eq!(snapshot.to_native(), native);
        assert_eq!(snapshot.output_latency(), Duration::from_millis(250));
        assert_eq!(snapshot.input_latency(), Duration::from_millis(250));
    }

    #[test]
    fn null_timing_is_zeroed() {
        let snapshot = unsafe { TimingSnapshot::from_raw(core::ptr::null()) };
        assert_eq!(snapshot, TimingSnapshot::default());
    }

    #[test]
    fn negative_and_nan_seconds_clamp_to_zero() {
        assert_eq!(seconds(-1.0), Duration::ZERO);
        assert_eq!(seconds(f64::NAN), Duration::ZERO);
        assert_eq!(seconds(0.5), Duration::from_millis(500));
    }

    #[test]
    fn flags_keep_unknown_bits() {
        let flags = StatusFlags::from_bits_retain(0x4 | 0x100);
        assert!(flags.contains(StatusFlags::OUTPUT_UNDERFLOW));
        assert!(flags.is_xrun());
        assert_eq!(flags.bits(), 0x104);
        assert_eq!(format!("{flags:?}"), "StatusFlags(OUTPUT_UNDERFLOW | 0x100)");
        assert!(!StatusFlags::PRIMING_OUTPUT.is_xrun());
    }
}
