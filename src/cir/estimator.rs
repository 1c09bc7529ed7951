//! Per-frame CIR estimation pipeline

use std::sync::Arc;

use num::complex::Complex32;
use tracing::{debug, info, instrument};

use super::correlate::delay_sweep;
use super::null_search::{find_null_symbol, frame_magnitude};
use super::profile::CirProfile;
use super::reference::ReferenceSymbol;
use super::{CirConfig, CirError};

/// CIR estimator for one capture window
///
/// Stateless apart from the log of NULL symbol positions, which grows by one
/// entry per estimated frame and is kept for diagnostics.
#[derive(Debug, Clone)]
pub struct CirEstimator {
    reference: Arc<ReferenceSymbol>,
    config: CirConfig,
    null_indices: Vec<usize>,
}

impl CirEstimator {
    /// Create an estimator sharing a loaded reference
    pub fn new(reference: Arc<ReferenceSymbol>, config: CirConfig) -> Result<Self, CirError> {
        config.validate()?;
        Ok(Self {
            reference,
            config,
            null_indices: Vec::new(),
        })
    }

    /// NULL symbol start of every frame estimated so far, relative to its frame
    pub fn null_indices(&self) -> &[usize] {
        &self.null_indices
    }

    /// Samples `estimate` needs from the start of a frame
    pub fn required_samples(&self) -> usize {
        self.config.required_samples(self.reference.len())
    }

    /// Estimate the CIR of the frame starting at `samples[0]`
    ///
    /// # Arguments
    /// * `samples` - At least `T_TF + max_component_delay + L_ref` samples; the
    ///   NULL symbol is searched in the first `T_TF`
    ///
    /// # Returns
    /// The power-normalized CIR profile, or `InsufficientSamples` if the
    /// correlation windows would run past the end of `samples`
    #[instrument(skip(self, samples), fields(samples_len = samples.len()))]
    pub fn estimate(&mut self, samples: &[Complex32]) -> Result<CirProfile, CirError> {
        let required = self.required_samples();
        if samples.len() < required {
            return Err(CirError::InsufficientSamples {
                required,
                available: samples.len(),
            });
        }

        let frame = &samples[..self.config.transmission_frame_len];

        let t_null = find_null_symbol(frame, self.config.null_symbol_len, self.config.search_stride);
        self.null_indices.push(t_null);

        // validate() guarantees guard <= null_symbol_len
        let corr_start = t_null + self.config.null_symbol_len - self.config.guard;

        let coefficients = delay_sweep(
            samples,
            corr_start,
            self.config.max_component_delay,
            &self.reference,
        )?;

        let frame_power = frame_magnitude(frame);
        let profile = CirProfile::new(coefficients, frame_power, t_null, corr_start);

        if let Some((delay, magnitude)) = profile.peak() {
            debug!(t_null, corr_start, frame_power, peak_delay = delay, peak_magnitude = magnitude, "frame estimated");
        }

        Ok(profile)
    }

    /// Estimate every frame of a multi-frame capture window
    ///
    /// Frames start at multiples of `T_TF`. A frame is estimated only if the
    /// window still holds `required_samples()` from its start; the remaining
    /// partial tail is discarded.
    #[instrument(skip(self, samples), fields(samples_len = samples.len()))]
    pub fn estimate_all(&mut self, samples: &[Complex32]) -> Result<Vec<CirProfile>, CirError> {
        let required = self.required_samples();
        let frame_len = self.config.transmission_frame_len;

        if samples.len() < required {
            return Err(CirError::InsufficientSamples {
                required,
                available: samples.len(),
            });
        }

        let num_frames = (samples.len() - required) / frame_len + 1;
        let mut profiles = Vec::with_capacity(num_frames);
        for i in 0..num_frames {
            let start = i * frame_len;
            profiles.push(self.estimate(&samples[start..])?);
        }

        info!(frames = profiles.len(), null_indices = ?self.null_indices, "capture window estimated");
        Ok(profiles)
    }
}
