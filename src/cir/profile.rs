//! CIR profile produced for one transmission frame

/// Delay profile of one transmission frame
///
/// `magnitudes[d]` is the correlation coefficient magnitude at delay `d`
/// divided by the summed sample magnitude of the source frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CirProfile {
    magnitudes: Vec<f32>,
    coefficients: Vec<f32>,
    /// Sum of |x| over the frame
    pub frame_power: f64,
    /// Detected NULL symbol start within the frame
    pub null_index: usize,
    /// Index where the delay-0 correlation window starts
    pub corr_start: usize,
}

impl CirProfile {
    /// Build a profile from raw coefficients, normalizing by `frame_power`
    ///
    /// A frame without energy keeps its coefficients unscaled (they are all zero).
    pub fn new(coefficients: Vec<f32>, frame_power: f64, null_index: usize, corr_start: usize) -> Self {
        let magnitudes = if frame_power > 0.0 {
            coefficients
                .iter()
                .map(|&c| (c as f64 / frame_power) as f32)
                .collect()
        } else {
            coefficients.clone()
        };

        Self {
            magnitudes,
            coefficients,
            frame_power,
            null_index,
            corr_start,
        }
    }

    /// Power-normalized magnitude per delay
    pub fn magnitudes(&self) -> &[f32] {
        &self.magnitudes
    }

    /// Correlation coefficient magnitude per delay, before power normalization
    pub fn coefficients(&self) -> &[f32] {
        &self.coefficients
    }

    /// Number of delays
    pub fn len(&self) -> usize {
        self.magnitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.magnitudes.is_empty()
    }

    /// Delay and magnitude of the strongest component
    pub fn peak(&self) -> Option<(usize, f32)> {
        self.magnitudes
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// The `n` strongest delays, highest magnitude first
    pub fn strongest(&self, n: usize) -> Vec<(usize, f32)> {
        let mut ranked: Vec<(usize, f32)> = self.magnitudes.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked
    }
}
