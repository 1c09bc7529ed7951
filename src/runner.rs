//! Periodic Capture-and-Analyze Runner
//!
//! Every `interval` the runner pulls one capture window from its sample source,
//! decodes it, estimates the CIR of each complete frame and publishes the batch
//! to a sink. Each cycle's failure is logged and counted; the loop always moves on.
//!
//! **States**: `Idle -> Running -> Stopping -> Stopped`. A runner configured with
//! `max_cycles` moves from `Running` to `Stopped` on its own.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use snafu::Snafu;
use tracing::{debug, info, warn};

use crate::cir::{CirConfig, CirError, CirEstimator, CirProfile, ReferenceSymbol, T_TF};
use crate::iq::{self, DecodeError, IqFormat};
use crate::render::RenderError;
use crate::stream::StreamBuffer;

/// Where a cycle takes its raw capture window from
pub trait SampleSource: Send {
    /// Remove and return the oldest `n` bytes if available, without blocking
    fn try_take(&self, n: usize) -> Option<Vec<u8>>;
}

impl SampleSource for Arc<StreamBuffer> {
    fn try_take(&self, n: usize) -> Option<Vec<u8>> {
        StreamBuffer::try_take(self, n)
    }
}

/// Consumer of the profiles produced by one cycle
pub trait CirSink: Send {
    fn publish(&mut self, batch: &CirBatch) -> Result<(), RenderError>;
}

/// Profiles estimated from one capture window
#[derive(Debug, Clone)]
pub struct CirBatch {
    /// 1-based number of the cycle that produced the batch
    pub cycle: u64,
    pub profiles: Vec<CirProfile>,
}

/// Configuration for the periodic runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Pause before each cycle
    pub interval: Duration,
    /// Samples pulled per cycle
    pub window_samples: usize,
    /// Wire format of the source bytes
    pub format: IqFormat,
    /// Stop on its own after this many cycles
    pub max_cycles: Option<u64>,
    pub cir: CirConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            window_samples: 10 * T_TF,
            format: IqFormat::U8,
            max_cycles: None,
            cir: CirConfig::default(),
        }
    }
}

impl RunnerConfig {
    /// Bytes pulled from the source per cycle
    pub fn window_bytes(&self) -> usize {
        self.window_samples * self.format.bytes_per_sample()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Counters reported when the loop exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerStats {
    pub cycles: u64,
    pub published: u64,
    pub empty: u64,
    pub failed: u64,
}

/// Result of one successful cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Source did not hold a full window yet
    NoData,
    /// A batch of `frames` profiles was published
    Published { frames: usize },
}

#[derive(Debug, Snafu)]
pub enum CycleError {
    /// Capture window could not be decoded
    #[snafu(context(false), display("decode failed: {source}"))]
    Decode { source: DecodeError },

    /// CIR estimation failed
    #[snafu(context(false), display("estimation failed: {source}"))]
    Estimate { source: CirError },

    /// Sink rejected the batch
    #[snafu(context(false), display("publish failed: {source}"))]
    Publish { source: RenderError },

    /// Cycle panicked
    #[snafu(display("cycle panicked: {message}"))]
    Panicked { message: String },
}

#[derive(Debug, Snafu)]
pub enum RunnerError {
    /// `start` called on a runner that is not idle
    #[snafu(display("runner already started (state {state:?})"))]
    AlreadyStarted { state: RunnerState },

    /// Estimator configuration is invalid
    #[snafu(context(false), display("invalid runner configuration: {source}"))]
    Config { source: CirError },

    /// Capture window cannot hold a full frame plus the correlation lookahead
    #[snafu(display("window of {window_samples} samples is shorter than the {required} one frame needs"))]
    WindowTooShort { window_samples: usize, required: usize },

    /// Runner thread could not be spawned
    #[snafu(display("failed to spawn runner thread: {source}"))]
    Spawn { source: io::Error },
}

/// One capture-decode-estimate-publish step, independent of scheduling
pub struct CaptureCycle<S, K> {
    source: S,
    sink: K,
    reference: Arc<ReferenceSymbol>,
    config: RunnerConfig,
    cycle: u64,
}

impl<S: SampleSource, K: CirSink> CaptureCycle<S, K> {
    pub fn new(source: S, sink: K, reference: Arc<ReferenceSymbol>, config: RunnerConfig) -> Self {
        Self {
            source,
            sink,
            reference,
            config,
            cycle: 0,
        }
    }

    /// Run one cycle
    ///
    /// A fresh estimator is created per capture window, so its NULL index log
    /// covers exactly the frames of this batch.
    pub fn run_once(&mut self) -> Result<CycleOutcome, CycleError> {
        self.cycle += 1;

        let Some(raw) = self.source.try_take(self.config.window_bytes()) else {
            return Ok(CycleOutcome::NoData);
        };

        let samples = iq::decode(&raw, self.config.format)?;
        let mut estimator = CirEstimator::new(Arc::clone(&self.reference), self.config.cir.clone())?;
        let profiles = estimator.estimate_all(&samples)?;
        let frames = profiles.len();

        let batch = CirBatch {
            cycle: self.cycle,
            profiles,
        };
        self.sink.publish(&batch)?;

        Ok(CycleOutcome::Published { frames })
    }

    /// Run one cycle, turning a panic into a `CycleError`
    pub fn run_isolated(&mut self) -> Result<CycleOutcome, CycleError> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.run_once())) {
            Ok(result) => result,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(CycleError::Panicked { message })
            }
        }
    }
}

/// Runs `CaptureCycle`s on a background thread at a fixed cadence
pub struct PeriodicRunner {
    config: RunnerConfig,
    reference: Arc<ReferenceSymbol>,
    state: Arc<Mutex<RunnerState>>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<RunnerStats>>,
}

impl PeriodicRunner {
    pub fn new(config: RunnerConfig, reference: Arc<ReferenceSymbol>) -> Result<Self, RunnerError> {
        config.cir.validate()?;
        let required = config.cir.required_samples(reference.len());
        if config.window_samples < required {
            return Err(RunnerError::WindowTooShort {
                window_samples: config.window_samples,
                required,
            });
        }
        Ok(Self {
            config,
            reference,
            state: Arc::new(Mutex::new(RunnerState::Idle)),
            stop_tx: None,
            handle: None,
        })
    }

    pub fn state(&self) -> RunnerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: RunnerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Start the cycle loop on a background thread
    pub fn start<S, K>(&mut self, source: S, sink: K) -> Result<(), RunnerError>
    where
        S: SampleSource + 'static,
        K: CirSink + 'static,
    {
        let state = self.state();
        if state != RunnerState::Idle {
            return Err(RunnerError::AlreadyStarted { state });
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let mut cycle = CaptureCycle::new(source, sink, Arc::clone(&self.reference), self.config.clone());
        let interval = self.config.interval;
        let max_cycles = self.config.max_cycles;
        let shared_state = Arc::clone(&self.state);

        self.set_state(RunnerState::Running);
        let spawned = thread::Builder::new()
            .name("cir-runner".to_string())
            .spawn(move || {
                let mut stats = RunnerStats::default();
                loop {
                    if max_cycles.is_some_and(|max| stats.cycles >= max) {
                        break;
                    }
                    match stop_rx.recv_timeout(interval) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }

                    stats.cycles += 1;
                    match cycle.run_isolated() {
                        Ok(CycleOutcome::NoData) => {
                            stats.empty += 1;
                            debug!(cycle = stats.cycles, "no full capture window available");
                        }
                        Ok(CycleOutcome::Published { frames }) => {
                            stats.published += 1;
                            debug!(cycle = stats.cycles, frames, "cycle published");
                        }
                        Err(e) => {
                            stats.failed += 1;
                            warn!(cycle = stats.cycles, error = %e, "CIR cycle failed");
                        }
                    }
                }

                *shared_state.lock().unwrap_or_else(PoisonError::into_inner) = RunnerState::Stopped;
                info!(?stats, "runner exited");
                stats
            });

        match spawned {
            Ok(handle) => {
                self.stop_tx = Some(stop_tx);
                self.handle = Some(handle);
                info!(interval_ms = interval.as_millis() as u64, window_samples = self.config.window_samples, "runner started");
                Ok(())
            }
            Err(source) => {
                self.set_state(RunnerState::Idle);
                Err(RunnerError::Spawn { source })
            }
        }
    }

    /// Request a stop and wait for the loop to exit
    ///
    /// The cycle in progress, if any, completes first. Returns the loop's
    /// counters, or `None` if the runner was never started.
    pub fn stop(&mut self) -> Option<RunnerStats> {
        if self.state() == RunnerState::Running {
            self.set_state(RunnerState::Stopping);
        }
        if let Some(stop_tx) = self.stop_tx.take() {
            // Loop may already have exited on max_cycles
            let _ = stop_tx.send(());
        }
        self.join()
    }

    /// Wait for a runner with `max_cycles` to finish on its own
    pub fn wait(&mut self) -> Option<RunnerStats> {
        self.join()
    }

    fn join(&mut self) -> Option<RunnerStats> {
        let handle = self.handle.take()?;
        let stats = match handle.join() {
            Ok(stats) => Some(stats),
            Err(_) => {
                warn!("runner thread panicked");
                None
            }
        };
        self.stop_tx = None;
        self.set_state(RunnerState::Stopped);
        stats
    }
}

impl Drop for PeriodicRunner {
    fn drop(&mut self) {
        self.stop();
    }
}
