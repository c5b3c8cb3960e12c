use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use pabridge_host::{
    Engine, PortAudioEngine, SimulatedEngine, Stream, StreamFlags, StreamParameters,
};
use pabridge_rt::{
    ensure_bindings, from_fn, lifecycle_diagnostics, Disposition, SampleFormat, StreamStats,
    REGISTRY_CAPACITY,
};
use tracing_subscriber::EnvFilter;

mod signal;

use signal::{Oscillator, Waveform};

/// Slack on top of the requested duration before a stream is stopped from outside.
const FINISH_SLACK: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let engine = make_engine(cli.engine)?;
    match cli.command {
        Commands::Info => execute_info(engine.as_ref()),
        Commands::Play(args) => execute_play(engine.as_ref(), args),
        Commands::Echo(args) => execute_echo(engine.as_ref(), args),
    }
}

#[derive(Parser)]
#[command(author, version, about = "Drive audio streams through the pabridge callback bridge")]
struct Cli {
    /// Engine that runs the audio thread.
    #[arg(long, value_enum, default_value_t = EngineKind::Sim, global = true)]
    engine: EngineKind,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print engine version and binding check results.
    Info,
    /// Play a generated test signal on an output-only stream.
    Play(PlayArgs),
    /// Copy input to output on a duplex stream.
    Echo(EchoArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EngineKind {
    Sim,
    Portaudio,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Wave {
    Sine,
    Noise,
    Silence,
}

impl From<Wave> for Waveform {
    fn from(wave: Wave) -> Self {
        match wave {
            Wave::Sine => Waveform::Sine,
            Wave::Noise => Waveform::Noise,
            Wave::Silence => Waveform::Silence,
        }
    }
}

#[derive(Args)]
struct StreamArgs {
    /// Stream parameters (JSON). Flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    sample_rate: Option<f64>,
    /// Frames per buffer; 0 lets the engine choose.
    #[arg(long)]
    frames: Option<u32>,
    /// Suggested latency in seconds for every direction of the stream.
    #[arg(long)]
    latency: Option<f64>,
    #[arg(long)]
    clip_off: bool,
    #[arg(long)]
    dither_off: bool,
    /// Stream duration in seconds.
    #[arg(long, default_value_t = 2.0)]
    seconds: f64,
}

impl StreamArgs {
    fn parameters(&self, fallback: StreamParameters) -> Result<StreamParameters> {
        let mut params = match &self.config {
            Some(path) => StreamParameters::load(path)
                .with_context(|| format!("failed to load stream configuration {}", path.display()))?,
            None => fallback,
        };
        if let Some(rate) = self.sample_rate {
            params.sample_rate = rate;
        }
        if let Some(frames) = self.frames {
            params.frames_per_buffer = (frames > 0).then_some(frames);
        }
        if let Some(latency) = self.latency {
            params.input = params.input.map(|input| input.with_latency(latency));
            params.output = params.output.map(|output| output.with_latency(latency));
        }
        if self.clip_off {
            params.flags |= StreamFlags::CLIP_OFF;
        }
        if self.dither_off {
            params.flags |= StreamFlags::DITHER_OFF;
        }
        Ok(params)
    }

    fn total_frames(&self, sample_rate: f64) -> Result<u64> {
        if !self.seconds.is_finite() || self.seconds <= 0.0 {
            anyhow::bail!("--seconds must be positive, got {}", self.seconds);
        }
        Ok((self.seconds * sample_rate).round() as u64)
    }
}

#[derive(Args)]
struct PlayArgs {
    #[arg(long, value_enum, default_value_t = Wave::Sine)]
    wave: Wave,
    #[arg(long, default_value_t = 440.0)]
    frequency: f32,
    #[arg(long, default_value_t = 0.2)]
    amplitude: f32,
    #[arg(long, default_value_t = 2)]
    channels: usize,
    #[command(flatten)]
    stream: StreamArgs,
}

#[derive(Args)]
struct EchoArgs {
    #[arg(long, default_value_t = 1)]
    input_channels: usize,
    #[arg(long, default_value_t = 2)]
    output_channels: usize,
    #[command(flatten)]
    stream: StreamArgs,
}

fn make_engine(kind: EngineKind) -> Result<Box<dyn Engine>> {
    let engine: Box<dyn Engine> = match kind {
        EngineKind::Sim => Box::new(SimulatedEngine::new().paced(true)),
        EngineKind::Portaudio => {
            Box::new(PortAudioEngine::new().context("failed to initialise PortAudio")?)
        }
    };
    Ok(engine)
}

fn execute_info(engine: &dyn Engine) -> Result<()> {
    let version = engine.version();
    println!("Engine: {}", engine.name());
    println!(
        "Version: {}.{}.{} ({:#08x}) {}",
        version.major,
        version.minor,
        version.sub_minor,
        version.number(),
        version.text
    );
    if !version.control_revision.is_empty() {
        println!("Revision: {}", version.control_revision);
    }
    match ensure_bindings() {
        Ok(()) => println!("Callback bindings: ok"),
        Err(err) => println!("Callback bindings: {err}"),
    }
    println!("Stream slots: {REGISTRY_CAPACITY}");
    let diagnostics = lifecycle_diagnostics();
    println!(
        "Lifecycle misuse: {} orphan callbacks, {} orphan finishes, {} duplicate finishes",
        diagnostics.orphan_callbacks, diagnostics.orphan_finishes, diagnostics.duplicate_finishes
    );
    Ok(())
}

fn execute_play(engine: &dyn Engine, args: PlayArgs) -> Result<()> {
    let params = args.stream.parameters(StreamParameters::output(
        args.channels,
        48_000.0,
        SampleFormat::Float32,
    ))?;
    let total = args.stream.total_frames(params.sample_rate)?;
    let mut oscillator = Oscillator::new(
        args.wave.into(),
        args.frequency,
        args.amplitude,
        params.sample_rate,
    );
    let mut rendered = 0u64;

    let callback = from_fn(move |buffer| {
        let Some(output) = buffer.output.as_mut() else {
            return Ok(Disposition::Abort);
        };
        let remaining = total.saturating_sub(rendered);
        let frames = (buffer.frames as u64).min(remaining) as usize;
        output.silence();
        oscillator.render(output, frames)?;
        rendered += frames as u64;
        Ok(if rendered >= total {
            Disposition::Complete
        } else {
            Disposition::Continue
        })
    });
    run(engine, &params, callback, args.stream.seconds)
}

fn execute_echo(engine: &dyn Engine, args: EchoArgs) -> Result<()> {
    let params = args.stream.parameters(StreamParameters::duplex(
        args.input_channels,
        args.output_channels,
        48_000.0,
        SampleFormat::Float32,
    ))?;
    let total = args.stream.total_frames(params.sample_rate)?;
    let mut echoed = 0u64;

    let callback = from_fn(move |buffer| {
        let (Some(input), Some(output)) = (buffer.input, buffer.output.as_mut()) else {
            return Ok(Disposition::Abort);
        };
        let width = input.format().sample_size();
        let in_channels = input.channels();
        for frame in 0..buffer.frames {
            let source = input.frame(frame).context("input frame out of range")?;
            let target = output.frame_mut(frame).context("output frame out of range")?;
            for (channel, sample) in target.chunks_exact_mut(width).enumerate() {
                let from = (channel % in_channels) * width;
                sample.copy_from_slice(&source[from..from + width]);
            }
        }
        echoed += buffer.frames as u64;
        Ok(if echoed >= total {
            Disposition::Complete
        } else {
            Disposition::Continue
        })
    });
    run(engine, &params, callback, args.stream.seconds)
}

fn run<C>(engine: &dyn Engine, params: &StreamParameters, callback: C, seconds: f64) -> Result<()>
where
    C: pabridge_rt::StreamCallback + 'static,
{
    let config = serde_json::to_string(params)?;
    tracing::debug!(%config, "stream parameters");
    let mut stream = Stream::open(engine, params, callback, None)
        .with_context(|| format!("failed to open stream on {}", engine.name()))?;
    stream.start().context("failed to start stream")?;

    let deadline = Duration::from_secs_f64(seconds) + FINISH_SLACK;
    match stream.wait_finished(deadline) {
        Some(reason) => tracing::info!(?reason, "stream finished"),
        None => {
            tracing::warn!("stream did not finish in time, stopping it");
            stream.stop().context("failed to stop stream")?;
        }
    }
    let stats = stream.stats();
    let cpu_load = stream.cpu_load();
    let reason = stream.finish_reason();
    let fault = stream.close().context("failed to close stream")?;

    print_stats(&stats, cpu_load);
    if let Some(reason) = reason {
        println!("Finished: {reason:?}");
    }
    if let Some(fault) = fault {
        return Err(anyhow::Error::new(fault).context("stream callback failed"));
    }
    Ok(())
}

fn print_stats(stats: &StreamStats, cpu_load: f64) {
    println!(
        "Processed {} frames in {} callbacks (cpu load {:.1}%)",
        stats.frames,
        stats.invocations,
        cpu_load * 100.0
    );
    let xruns = stats.input_underflows
        + stats.input_overflows
        + stats.output_underflows
        + stats.output_overflows;
    if xruns > 0 {
        println!(
            "  xruns: {} input underflow, {} input overflow, {} output underflow, {} output overflow",
            stats.input_underflows,
            stats.input_overflows,
            stats.output_underflows,
            stats.output_overflows
        );
    }
    if stats.priming_buffers > 0 {
        println!("  priming buffers: {}", stats.priming_buffers);
    }
}
