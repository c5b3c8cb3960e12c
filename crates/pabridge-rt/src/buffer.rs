//! Zero-copy views over the engine's interleaved sample memory.

use core::ffi::c_void;

use crate::format::{Sample, SampleFormat};
use crate::timing::{StatusFlags, TimingSnapshot};

/// Per-stream format metadata needed to size the native buffers of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLayout {
    pub format: SampleFormat,
    pub input_channels: usize,
    pub output_channels: usize,
}

impl StreamLayout {
    pub const fn output_only(format: SampleFormat, channels: usize) -> Self {
        Self {
            format,
            input_channels: 0,
            output_channels: channels,
        }
    }

    pub const fn input_only(format: SampleFormat, channels: usize) -> Self {
        Self {
            format,
            input_channels: channels,
            output_channels: 0,
        }
    }

    pub const fn duplex(format: SampleFormat, input_channels: usize, output_channels: usize) -> Self {
        Self {
            format,
            input_channels,
            output_channels,
        }
    }

    pub const fn input_frame_bytes(&self) -> usize {
        self.input_channels * self.format.sample_size()
    }

    pub const fn output_frame_bytes(&self) -> usize {
        self.output_channels * self.format.sample_size()
    }
}

fn byte_len(frames: usize, channels: usize, format: SampleFormat) -> Option<usize> {
    frames
        .checked_mul(channels)?
        .checked_mul(format.sample_size())
        .filter(|len| *len <= isize::MAX as usize)
}

/// Read-only window over one invocation's captured input.
#[derive(Debug, Clone, Copy)]
pub struct InputView<'a> {
    bytes: &'a [u8],
    frames: usize,
    channels: usize,
    format: SampleFormat,
}

impl<'a> InputView<'a> {
    /// Wraps native input memory.
    ///
    /// Returns `None` for a null pointer or a stream without input channels.
    ///
    /// # Safety
    /// A non-null `ptr` must reference `frames * channels` interleaved samples of `format` that
    /// stay valid and unmodified for `'a`.
    pub unsafe fn from_raw(
        ptr: *const c_void,
        frames: usize,
        channels: usize,
        format: SampleFormat,
    ) -> Option<Self> {
        if ptr.is_null() || channels == 0 {
            return None;
        }
        let len = byte_len(frames, channels, format)?;
        Some(Self {
            bytes: core::slice::from_raw_parts(ptr.cast::<u8>(), len),
            frames,
            channels,
            format,
        })
    }

    pub fn from_bytes(bytes: &'a [u8], channels: usize, format: SampleFormat) -> Option<Self> {
        let frame_bytes = channels.checked_mul(format.sample_size())?;
        if frame_bytes == 0 || bytes.len() % frame_bytes != 0 {
            return None;
        }
        Some(Self {
            frames: bytes.len() / frame_bytes,
            bytes,
            channels,
            format,
        })
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Typed samples, or `None` when `T` does not match the stream format.
    pub fn samples<T: Sample>(&self) -> Option<&'a [T]> {
        if T::FORMAT != self.format {
            return None;
        }
        bytemuck::try_cast_slice(self.bytes).ok()
    }

    /// Raw bytes of one interleaved frame.
    pub fn frame(&self, index: usize) -> Option<&'a [u8]> {
        let frame_bytes = self.channels * self.format.sample_size();
        let start = index.checked_mul(frame_bytes)?;
        self.bytes.get(start..start.checked_add(frame_bytes)?)
    }
}

/// Writable window over one invocation's output memory.
#[derive(Debug)]
pub struct OutputView<'a> {
    bytes: &'a mut [u8],
    frames: usize,
    channels: usize,
    format: SampleFormat,
}

impl<'a> OutputView<'a> {
    /// Wraps native output memory.
    ///
    /// Returns `None` for a null pointer or a stream without output channels.
    ///
    /// # Safety
    /// A non-null `ptr` must reference `frames * channels` writable interleaved samples of
    /// `format`, exclusively borrowed for `'a`.
    pub unsafe fn from_raw(
        ptr: *mut c_void,
        frames: usize,
        channels: usize,
        format: SampleFormat,
    ) -> Option<Self> {
        if ptr.is_null() || channels == 0 {
            return None;
        }
        let len = byte_len(frames, channels, format)?;
        Some(Self {
            bytes: core::slice::from_raw_parts_mut(ptr.cast::<u8>(), len),
            frames,
            channels,
            format,
        })
    }

    pub fn from_bytes(bytes: &'a mut [u8], channels: usize, format: SampleFormat) -> Option<Self> {
        let frame_bytes = channels.checked_mul(format.sample_size())?;
        if frame_bytes == 0 || bytes.len() % frame_bytes != 0 {
            return None;
        }
        Some(Self {
            frames: bytes.len() / frame_bytes,
            bytes,
            channels,
            format,
        })
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn as_bytes(&self) -> &[u8] {
        &*self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut *self.bytes
    }

    /// Typed samples, or `None` when `T` does not match the stream format.
    pub fn samples_mut<T: Sample>(&mut self) -> Option<&mut [T]> {
        if T::FORMAT != self.format {
            return None;
        }
        bytemuck::try_cast_slice_mut(&mut *self.bytes).ok()
    }

    /// Raw bytes of one interleaved frame.
    pub fn frame_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        let frame_bytes = self.channels * self.format.sample_size();
        let start = index.checked_mul(frame_bytes)?;
        self.bytes.get_mut(start..start.checked_add(frame_bytes)?)
    }

    /// Writes `value` to every sample. Returns `false` if `T` does not match the stream format.
    pub fn fill<T: Sample>(&mut self, value: T) -> bool {
        match self.samples_mut::<T>() {
            Some(samples) => {
                samples.fill(value);
                true
            }
            None => false,
        }
    }

    pub fn silence(&mut self) {
        self.bytes.fill(self.format.silence_byte());
    }
}

/// Everything the stream callback sees for one engine buffer.
#[derive(Debug)]
pub struct StreamBuffer<'a> {
    /// Captured input, absent for output-only streams.
    pub input: Option<InputView<'a>>,
    /// Output to render, absent for input-only streams.
    pub output: Option<OutputView<'a>>,
    pub frames: usize,
    pub timing: TimingSnapshot,
    pub flags: StatusFlags,
}

impl<'a> StreamBuffer<'a> {
    pub fn silence(&mut self) {
        if let Some(output) = self.output.as_mut() {
            output.silence();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_view_exposes_exact_frames() {
        let samples = [0.25f32; 64 * 2];
        let view = unsafe {
            InputView::from_raw(samples.as_ptr().cast(), 64, 2, SampleFormat::Float32)
        }
        .expect("view");
        assert_eq!(view.frames(), 64);
        assert_eq!(view.as_bytes().len(), 64 * 2 * 4);
        assert_eq!(view.samples::<f32>().map(<[f32]>::len), Some(128));
        assert!(view.samples::<i16>().is_none());
        assert!(view.frame(63).is_some());
        assert!(view.frame(64).is_none());
    }

    #[test]
    fn null_or_channelless_memory_has_no_view() {
        let mut out = [0u8; 16];
        assert!(unsafe {
            InputView::from_raw(core::ptr::null(), 4, 2, SampleFormat::Int16)
        }
        .is_none());
        assert!(unsafe {
            OutputView::from_raw(out.as_mut_ptr().cast(), 4, 0, SampleFormat::Int16)
        }
        .is_none());
    }

    #[test]
    fn uint8_silence_is_midpoint() {
        let mut bytes = [0u8; 8];
        let mut view = OutputView::from_bytes(&mut bytes, 2, SampleFormat::UInt8).expect("view");
        view.silence();
        assert_eq!(bytes, [0x80; 8]);
    }

    #[test]
    fn packed_24_bit_frames_are_three_bytes_per_channel() {
        let mut bytes = [0u8; 3 * 2 * 5];
        let mut view = OutputView::from_bytes(&mut bytes, 2, SampleFormat::Int24).expect("view");
        assert_eq!(view.frames(), 5);
        assert!(view.samples_mut::<i32>().is_none());
        view.frame_mut(4).expect("last frame").fill(0x7f);
        assert_eq!(&bytes[24..], &[0x7f; 6]);
    }

    #[test]
    fn from_bytes_rejects_partial_frames() {
        let bytes = [0u8; 7];
        assert!(InputView::from_bytes(&bytes, 2, SampleFormat::Int16).is_none());
    }
}
