//! Channel Impulse Response Estimation
//!
//! Estimates the CIR of a DAB channel from one transmission frame of baseband
//! samples by correlating against the known phase reference symbol.
//!
//! **DAB Frame Structure** (Transmission Mode 1, 2.048 Msps):
//! ```text
//! | Transmission frame (196608 samples)                 |
//! | NULL (2656) | PRS (2552) | data symbols ...          |
//! ```
//!
//! **Algorithm**:
//! 1. Locate the NULL symbol: the `T_NULL`-long window with the least summed magnitude,
//!    searched every `search_stride` samples
//! 2. Start correlating `guard` samples before the expected end of the NULL symbol
//! 3. Sweep candidate delays `0..max_component_delay`, computing the correlation
//!    coefficient magnitude against the phase reference symbol at each delay
//! 4. Divide by the summed magnitude of the whole frame so profiles from frames of
//!    different signal strength are comparable
//!
//! **Module Organization**:
//! - `reference` - Phase reference symbol loading
//! - `null_search` - NULL symbol detection
//! - `correlate` - Correlation coefficient, delay sweep and autocorrelation
//! - `profile` - CIR profile type
//! - `estimator` - Per-frame pipeline and NULL index log

mod correlate;
mod null_search;
pub mod estimator;
pub mod profile;
pub mod reference;

use std::path::PathBuf;

use snafu::Snafu;

use crate::iq::DecodeError;

pub use correlate::{autocorrelate, correlation_magnitude, delay_sweep};
pub use estimator::CirEstimator;
pub use null_search::{find_null_symbol, frame_magnitude};
pub use profile::CirProfile;
pub use reference::{ReferenceLengthWarning, ReferenceSymbol};

/// Samples per transmission frame (TM1 at 2.048 Msps)
pub const T_TF: usize = 196_608;

/// Samples in the NULL symbol (TM1 at 2.048 Msps)
pub const T_NULL: usize = 2656;

/// Samples in the phase reference symbol file
pub const REFERENCE_LEN: usize = 2552;

/// Subsampling stride of the NULL symbol search
pub const SEARCH_STRIDE: usize = 20;

/// Correlation starts this many samples before the expected NULL symbol end
pub const GUARD: usize = 50;

/// Number of candidate delays in a profile (~146 km of excess path at 2.048 Msps)
pub const MAX_COMPONENT_DELAY: usize = 1000;

/// Default location of the phase reference symbol
pub const DEFAULT_REFERENCE_PATH: &str = "phasereference.2048000.fc64.iq";

/// Configuration for the CIR estimator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CirConfig {
    /// Samples per transmission frame
    pub transmission_frame_len: usize,
    /// Samples in the NULL symbol
    pub null_symbol_len: usize,
    /// Step between NULL search windows
    pub search_stride: usize,
    /// Offset back from the NULL symbol end where correlation starts
    pub guard: usize,
    /// Number of delays evaluated per profile
    pub max_component_delay: usize,
    /// Expected phase reference length, only checked to raise a warning
    pub reference_len: usize,
}

impl Default for CirConfig {
    fn default() -> Self {
        Self {
            transmission_frame_len: T_TF,
            null_symbol_len: T_NULL,
            search_stride: SEARCH_STRIDE,
            guard: GUARD,
            max_component_delay: MAX_COMPONENT_DELAY,
            reference_len: REFERENCE_LEN,
        }
    }
}

impl CirConfig {
    /// Check that the windows are consistent with each other
    pub fn validate(&self) -> Result<(), CirError> {
        let reason = if self.search_stride == 0 {
            Some("search_stride must be at least 1")
        } else if self.null_symbol_len == 0 {
            Some("null_symbol_len must be at least 1")
        } else if self.null_symbol_len > self.transmission_frame_len {
            Some("null_symbol_len exceeds transmission_frame_len")
        } else if self.guard > self.null_symbol_len {
            Some("guard exceeds null_symbol_len")
        } else if self.max_component_delay == 0 {
            Some("max_component_delay must be at least 1")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(CirError::InvalidConfig { reason }),
            None => Ok(()),
        }
    }

    /// Samples needed to estimate one frame with a reference of `reference_len` samples
    ///
    /// The NULL symbol can be found anywhere in the frame, so the delay sweep may
    /// read up to `T_TF + max_component_delay + L_ref` samples from the frame start.
    pub fn required_samples(&self, reference_len: usize) -> usize {
        self.transmission_frame_len + self.max_component_delay + reference_len
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CirError {
    /// Caller supplied fewer samples than the configured windows need
    #[snafu(display("need at least {required} samples for CIR estimation, got {available}"))]
    InsufficientSamples { required: usize, available: usize },

    /// Estimator windows are inconsistent
    #[snafu(display("invalid CIR configuration: {reason}"))]
    InvalidConfig { reason: &'static str },

    /// Reference file could not be read
    #[snafu(display("failed to read phase reference {}: {source}", path.display()))]
    ReadReference { path: PathBuf, source: std::io::Error },

    /// Reference file is not valid cf32 data
    #[snafu(display("phase reference {} is not cf32 IQ: {source}", path.display()))]
    BadReference { path: PathBuf, source: DecodeError },

    /// Reference holds no samples or has no variance
    #[snafu(display("phase reference is empty or constant"))]
    EmptyReference,
}
