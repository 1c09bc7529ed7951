pub mod cir;
pub mod device;
pub mod iq;
pub mod render;
pub mod runner;
pub mod simulation;
pub mod stream;
pub mod tracing_init;

pub use cir::{CirConfig, CirError, CirEstimator, CirProfile, ReferenceSymbol};
pub use device::{DeviceParams, DeviceSource, DeviceSupervisor};
pub use iq::{decode, IqFormat};
pub use render::{LogSink, SvgRenderer};
pub use runner::{CirBatch, CirSink, PeriodicRunner, RunnerConfig, RunnerStats, SampleSource};
pub use stream::StreamBuffer;
