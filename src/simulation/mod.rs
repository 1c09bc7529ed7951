//! Channel simulation
//!
//! Synthetic impairments for testing the estimator against a known channel:
//! - `channel` - Multipath: delayed, scaled copies added to the direct path
//! - `noise` - Seeded complex Gaussian noise

pub mod channel;
pub mod noise;

use snafu::Snafu;

pub use channel::{apply_multipath, PathComponent};
pub use noise::{add_awgn, complex_gaussian, rms_power};

#[derive(Debug, Snafu, PartialEq)]
pub enum SimulationError {
    /// Noise level is not a finite number
    #[snafu(display("invalid noise level {value}"))]
    InvalidNoise { value: f32 },

    /// Path component could not be parsed
    #[snafu(display("invalid path component '{text}', expected <delay>:<amplitude>"))]
    InvalidComponent { text: String },
}
