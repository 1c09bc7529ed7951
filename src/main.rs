//! rustycir - DAB channel impulse response monitor
//!
//! Usage:
//!   rustycir live --freq 227360000 [--rtl-tcp 127.0.0.1:1234] [--cycles 60]
//!   rustycir analyze capture.iq --format u8 [--output cir.svg]
//!
//! `live` captures continuously from an RTL-SDR (through `rtl_sdr` or an
//! `rtl_tcp` server), estimates the CIR of every frame once per interval and
//! keeps the SVG plot up to date. A capture source that stops delivering is
//! restarted after `--retry-ms`; one that never delivers a byte ends the run.
//!
//! `analyze` runs the same estimation once over a recorded capture file.

use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use snafu::{ResultExt, Snafu};
use tracing::{error, info, warn};

use rustycir::cir::{
    CirConfig, CirError, CirEstimator, ReferenceSymbol, DEFAULT_REFERENCE_PATH, GUARD,
    MAX_COMPONENT_DELAY, SEARCH_STRIDE, T_TF,
};
use rustycir::device::{
    DeviceError, DeviceParams, DeviceSource, DeviceSupervisor, ReceiveError, DEFAULT_PROGRAM,
};
use rustycir::iq::{self, DecodeError, IqFormat};
use rustycir::render::{RenderError, DEFAULT_OUTPUT};
use rustycir::runner::{CirBatch, CirSink, PeriodicRunner, RunnerConfig, RunnerError, RunnerState};
use rustycir::tracing_init::init_tracing;
use rustycir::{LogSink, StreamBuffer, SvgRenderer};

/// How often the live loop checks on the capture source
const SUPERVISE_POLL: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(name = "rustycir", version, about = "Estimate the channel impulse response of a DAB transmission")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Capture from an RTL-SDR and plot the CIR periodically
    Live(LiveArgs),
    /// Estimate the CIR of every frame in a recorded capture
    Analyze(AnalyzeArgs),
}

#[derive(Args)]
struct EstimatorArgs {
    /// Phase reference symbol, cf32
    #[arg(long, default_value = DEFAULT_REFERENCE_PATH)]
    reference: PathBuf,

    /// Step between NULL symbol search windows
    #[arg(long, default_value_t = SEARCH_STRIDE)]
    stride: usize,

    /// Samples before the NULL symbol end where correlation starts
    #[arg(long, default_value_t = GUARD)]
    guard: usize,

    /// Number of delays evaluated per profile
    #[arg(long, default_value_t = MAX_COMPONENT_DELAY)]
    max_delay: usize,
}

impl EstimatorArgs {
    fn cir_config(&self) -> CirConfig {
        CirConfig {
            search_stride: self.stride,
            guard: self.guard,
            max_component_delay: self.max_delay,
            ..CirConfig::default()
        }
    }
}

#[derive(Args)]
struct LiveArgs {
    /// Center frequency in Hz
    #[arg(long)]
    freq: u32,

    /// Sample rate in Hz
    #[arg(long, default_value_t = 2_048_000)]
    rate: u32,

    /// Tuner gain in dB
    #[arg(long, default_value_t = 20.0)]
    gain: f32,

    /// Samples analyzed per cycle
    #[arg(long, default_value_t = 10 * T_TF)]
    samps: usize,

    /// Read from an rtl_tcp server instead of starting rtl_sdr
    #[arg(long, value_name = "ADDR")]
    rtl_tcp: Option<SocketAddr>,

    /// rtl_sdr-compatible capture program
    #[arg(long, value_name = "PROGRAM", default_value = DEFAULT_PROGRAM, conflicts_with = "rtl_tcp")]
    rtl_sdr: PathBuf,

    /// SVG plot, replaced after every cycle
    #[arg(long, default_value = DEFAULT_OUTPUT)]
    output: PathBuf,

    /// Pause between cycles in milliseconds
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Exit after this many cycles
    #[arg(long)]
    cycles: Option<u64>,

    /// Delay before restarting a failed capture source, in milliseconds
    #[arg(long, default_value_t = 2000)]
    retry_ms: u64,

    #[command(flatten)]
    estimator: EstimatorArgs,
}

impl LiveArgs {
    fn device_params(&self) -> DeviceParams {
        let source = match self.rtl_tcp {
            Some(addr) => DeviceSource::RtlTcp { addr },
            None => DeviceSource::Process {
                program: self.rtl_sdr.clone(),
            },
        };
        DeviceParams {
            source,
            frequency_hz: self.freq,
            sample_rate_hz: self.rate,
            gain_tenths_db: (self.gain * 10.0).round().max(0.0) as u32,
        }
    }
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Capture file
    input: PathBuf,

    /// Sample format of the capture file
    #[arg(long, default_value_t = IqFormat::U8)]
    format: IqFormat,

    /// SVG plot of all frames
    #[arg(long, default_value = DEFAULT_OUTPUT)]
    output: PathBuf,

    #[command(flatten)]
    estimator: EstimatorArgs,
}

#[derive(Debug, Snafu)]
enum AppError {
    #[snafu(context(false), display("{source}"))]
    Cir { source: CirError },

    #[snafu(context(false), display("{source}"))]
    Device { source: DeviceError },

    #[snafu(context(false), display("{source}"))]
    Runner { source: RunnerError },

    #[snafu(context(false), display("{source}"))]
    Render { source: RenderError },

    #[snafu(context(false), display("{source}"))]
    Decode { source: DecodeError },

    #[snafu(display("capture source delivered no samples: {source}"))]
    SilentCapture { source: ReceiveError },

    #[snafu(display("failed to read capture {}: {source}", path.display()))]
    ReadCapture { path: PathBuf, source: io::Error },
}

fn load_reference(path: &Path, config: &CirConfig) -> Result<Arc<ReferenceSymbol>, AppError> {
    let (reference, _warning) = ReferenceSymbol::load(path, config.reference_len)?;
    Ok(Arc::new(reference))
}

fn live(args: LiveArgs) -> Result<(), AppError> {
    let cir = args.estimator.cir_config();
    let reference = load_reference(&args.estimator.reference, &cir)?;

    // Both capture sources deliver unsigned 8-bit IQ
    let config = RunnerConfig {
        interval: Duration::from_millis(args.interval_ms),
        window_samples: args.samps,
        format: IqFormat::U8,
        max_cycles: args.cycles,
        cir,
    };
    let buffer = Arc::new(StreamBuffer::for_window(config.window_samples, config.format));

    let mut runner = PeriodicRunner::new(config, reference)?;

    let params = args.device_params();
    let mut supervisor = Some(DeviceSupervisor::start(&params, Arc::clone(&buffer))?);

    let renderer = SvgRenderer::new(&args.output);
    info!(path = %renderer.path().display(), "writing CIR plot");
    let sinks: Vec<Box<dyn CirSink>> = vec![Box::new(renderer), Box::new(LogSink)];
    runner.start(Arc::clone(&buffer), sinks)?;

    let retry = Duration::from_millis(args.retry_ms);
    let mut next_attempt = Instant::now();
    let mut delivered = 0u64;
    while runner.state() == RunnerState::Running {
        thread::sleep(SUPERVISE_POLL);

        match supervisor.take() {
            Some(device) if device.is_receiving() => supervisor = Some(device),
            Some(device) => {
                let result = device.stop();
                delivered += result.as_ref().map_or_else(ReceiveError::bytes_received, |total| *total);
                match result {
                    Err(e) if delivered == 0 => {
                        runner.stop();
                        return Err(AppError::SilentCapture { source: e });
                    }
                    Err(e) => warn!(error = %e, "capture source stopped delivering"),
                    Ok(_) => {}
                }
                next_attempt = Instant::now() + retry;
            }
            None if Instant::now() >= next_attempt => {
                match DeviceSupervisor::start(&params, Arc::clone(&buffer)) {
                    Ok(device) => supervisor = Some(device),
                    Err(e) => {
                        warn!(error = %e, retry_ms = args.retry_ms, "capture restart failed");
                        next_attempt = Instant::now() + retry;
                    }
                }
            }
            None => {}
        }
    }

    let stats = runner.wait();
    if let Some(device) = supervisor {
        if let Err(e) = device.stop() {
            warn!(error = %e, "capture source failed during shutdown");
        }
    }
    info!(?stats, "live capture finished");
    Ok(())
}

fn analyze(args: AnalyzeArgs) -> Result<(), AppError> {
    let cir = args.estimator.cir_config();
    let reference = load_reference(&args.estimator.reference, &cir)?;

    let raw = fs::read(&args.input).context(ReadCaptureSnafu { path: &args.input })?;
    let samples = iq::decode(&raw, args.format)?;
    info!(path = %args.input.display(), samples = samples.len(), format = %args.format, "capture loaded");

    let mut estimator = CirEstimator::new(reference, cir)?;
    let profiles = estimator.estimate_all(&samples)?;

    let batch = CirBatch { cycle: 1, profiles };
    LogSink.publish(&batch)?;
    SvgRenderer::new(&args.output).write(&batch)?;
    info!(path = %args.output.display(), frames = batch.profiles.len(), "CIR plot written");
    Ok(())
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Live(args) => live(args),
        Command::Analyze(args) => analyze(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "rustycir failed");
            ExitCode::FAILURE
        }
    }
}
