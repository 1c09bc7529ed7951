//! Multipath Channel Simulator
//!
//! Passes a cf32 recording through a multipath channel with optional AWGN, for
//! checking the estimator against echoes at known delays.
//!
//! Usage:
//!   cirsim [OPTIONS] <input.cf32> <output>
//!
//! Examples:
//!   # Two echoes, 14 and 25 samples late
//!   cirsim --path 14:0.4 --path 25:0.3 clean.cf32 echoes.cf32
//!
//!   # Same channel at 10 dB SNR, quantized like an RTL-SDR capture
//!   cirsim --path 14:0.4 --snr 10 --format u8 clean.cf32 echoes.iq
//!
//!   # Check the echoes are visible in the autocorrelation of the output
//!   cirsim --path 14:0.4 --path 25:0.3 --autocorrelate 50 clean.cf32 echoes.cf32

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use rustycir::cir::autocorrelate;
use rustycir::iq::{self, IqFormat};
use rustycir::render::NUM_PEAKS;
use rustycir::simulation::{add_awgn, apply_multipath, rms_power, PathComponent};
use rustycir::tracing_init::init_tracing;

#[derive(Parser)]
#[command(name = "cirsim", about = "Apply a multipath channel to a cf32 recording")]
struct Cli {
    /// Clean cf32 recording
    input: PathBuf,

    /// Where to write the received signal
    output: PathBuf,

    /// Echo as <delay samples>:<relative amplitude>, repeatable
    #[arg(long = "path", value_name = "DELAY:AMP")]
    paths: Vec<PathComponent>,

    /// Add white Gaussian noise at this SNR in dB
    #[arg(long)]
    snr: Option<f32>,

    /// Noise seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Output sample format
    #[arg(long, default_value_t = IqFormat::Cf32)]
    format: IqFormat,

    /// Report the strongest autocorrelation lags below this many samples
    #[arg(long, value_name = "LAGS")]
    autocorrelate: Option<usize>,
}

fn run(cli: &Cli) -> Result<(), String> {
    let raw = fs::read(&cli.input).map_err(|e| format!("failed to read {}: {}", cli.input.display(), e))?;
    let clean = iq::decode(&raw, IqFormat::Cf32).map_err(|e| e.to_string())?;

    let mut received = apply_multipath(&clean, &cli.paths);
    if let Some(snr_db) = cli.snr {
        add_awgn(&mut received, snr_db, cli.seed).map_err(|e| e.to_string())?;
    }

    info!(
        samples = received.len(),
        paths = ?cli.paths,
        snr_db = ?cli.snr,
        rms = rms_power(&received),
        "channel applied"
    );

    if let Some(lags) = cli.autocorrelate {
        let autocorr = autocorrelate(&received, lags);
        let mut ranked: Vec<(usize, f32)> = autocorr.into_iter().enumerate().skip(1).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        for (lag, value) in ranked.into_iter().take(NUM_PEAKS) {
            info!(lag, value, "autocorrelation peak");
        }
    }

    fs::write(&cli.output, iq::encode(&received, cli.format))
        .map_err(|e| format!("failed to write {}: {}", cli.output.display(), e))
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
