//! Phase reference symbol
//!
//! Loaded once at startup from a cf32 file and shared read-only by every estimator.

use std::fmt;
use std::fs;
use std::path::Path;

use num::complex::Complex32;
use snafu::ResultExt;
use tracing::{info, warn};

use super::{BadReferenceSnafu, CirError, ReadReferenceSnafu};
use crate::iq::{self, IqFormat};

/// Loaded reference length differs from the configured constant
///
/// Informational only: estimation proceeds with the samples that were loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceLengthWarning {
    pub expected: usize,
    pub actual: usize,
}

impl fmt::Display for ReferenceLengthWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "phase reference has {} samples, expected {}",
            self.actual, self.expected
        )
    }
}

/// Known phase reference waveform with its correlation statistics precomputed
#[derive(Debug, Clone)]
pub struct ReferenceSymbol {
    samples: Vec<Complex32>,
    /// Reference minus its mean
    centered: Vec<Complex32>,
    /// Sum of |centered|^2
    energy: f64,
}

impl ReferenceSymbol {
    /// Build a reference from samples already in memory
    pub fn from_samples(samples: Vec<Complex32>) -> Result<Self, CirError> {
        if samples.is_empty() {
            return Err(CirError::EmptyReference);
        }

        let n = samples.len() as f64;
        let (sum_re, sum_im) = samples
            .iter()
            .fold((0.0f64, 0.0f64), |(re, im), s| (re + s.re as f64, im + s.im as f64));
        let mean = Complex32::new((sum_re / n) as f32, (sum_im / n) as f32);

        let centered: Vec<Complex32> = samples.iter().map(|s| *s - mean).collect();
        let energy: f64 = centered.iter().map(|c| c.norm_sqr() as f64).sum();
        if energy <= 0.0 {
            return Err(CirError::EmptyReference);
        }

        Ok(Self {
            samples,
            centered,
            energy,
        })
    }

    /// Load a cf32 reference file
    ///
    /// # Arguments
    /// * `path` - File of interleaved native-endian f32 I/Q pairs
    /// * `expected_len` - Length the configuration expects; a mismatch is reported, not rejected
    ///
    /// # Returns
    /// The reference and, if its length is unexpected, a warning
    pub fn load(
        path: impl AsRef<Path>,
        expected_len: usize,
    ) -> Result<(Self, Option<ReferenceLengthWarning>), CirError> {
        let path = path.as_ref();
        let raw = fs::read(path).context(ReadReferenceSnafu { path })?;
        let samples = iq::decode(&raw, IqFormat::Cf32).context(BadReferenceSnafu { path })?;
        let reference = Self::from_samples(samples)?;

        info!(path = %path.display(), samples = reference.len(), "loaded phase reference");

        let warning = reference.check_length(expected_len);
        if let Some(w) = warning {
            warn!(expected = w.expected, actual = w.actual, "{}", w);
        }
        Ok((reference, warning))
    }

    /// Compare the loaded length against the expected constant
    pub fn check_length(&self, expected_len: usize) -> Option<ReferenceLengthWarning> {
        (self.samples.len() != expected_len).then_some(ReferenceLengthWarning {
            expected: expected_len,
            actual: self.samples.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Complex32] {
        &self.samples
    }

    pub(crate) fn centered(&self) -> &[Complex32] {
        &self.centered
    }

    pub(crate) fn energy(&self) -> f64 {
        self.energy
    }
}
