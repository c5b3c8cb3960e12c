//! Test-signal generation inside the stream callback.

use std::f32::consts::TAU;

use anyhow::Context;
use pabridge_rt::{OutputView, SampleFormat};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Noise,
    Silence,
}

/// Mono source duplicated onto every output channel.
pub struct Oscillator {
    waveform: Waveform,
    phase: f32,
    step: f32,
    amplitude: f32,
    rng: StdRng,
}

impl Oscillator {
    pub fn new(waveform: Waveform, frequency: f32, amplitude: f32, sample_rate: f64) -> Self {
        Self {
            waveform,
            phase: 0.0,
            step: TAU * frequency / sample_rate as f32,
            amplitude: amplitude.clamp(0.0, 1.0),
            rng: StdRng::seed_from_u64(0x5eed),
        }
    }

    pub fn next_sample(&mut self) -> f32 {
        match self.waveform {
            Waveform::Sine => {
                let value = self.phase.sin() * self.amplitude;
                self.phase = (self.phase + self.step) % TAU;
                value
            }
            Waveform::Noise => self.rng.gen_range(-1.0f32..=1.0) * self.amplitude,
            Waveform::Silence => 0.0,
        }
    }

    /// Renders `frames` frames into the start of `output`.
    pub fn render(&mut self, output: &mut OutputView<'_>, frames: usize) -> anyhow::Result<()> {
        let format = output.format();
        let width = format.sample_size();
        for frame in 0..frames {
            let value = self.next_sample();
            let bytes = output
                .frame_mut(frame)
                .context("output frame out of range")?;
            for sample in bytes.chunks_exact_mut(width) {
                encode(format, value, sample);
            }
        }
        Ok(())
    }
}

/// Writes one normalised sample in `format`. `out` holds exactly one sample.
pub fn encode(format: SampleFormat, value: f32, out: &mut [u8]) {
    let value = value.clamp(-1.0, 1.0);
    match format {
        SampleFormat::Float32 => out.copy_from_slice(&value.to_ne_bytes()),
        SampleFormat::Int32 => {
            out.copy_from_slice(&((value * i32::MAX as f32) as i32).to_ne_bytes())
        }
        SampleFormat::Int24 => {
            let packed = ((value * 8_388_607.0) as i32).to_ne_bytes();
            let low = if cfg!(target_endian = "little") { &packed[..3] } else { &packed[1..] };
            out.copy_from_slice(low);
        }
        SampleFormat::Int16 => {
            out.copy_from_slice(&((value * i16::MAX as f32) as i16).to_ne_bytes())
        }
        SampleFormat::Int8 => out[0] = ((value * i8::MAX as f32) as i8) as u8,
        SampleFormat::UInt8 => out[0] = (value * 127.0 + 128.0) as u8,
    }
}
