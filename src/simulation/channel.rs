//! Multipath channel model

use std::str::FromStr;

use num::complex::Complex32;

use super::SimulationError;

/// One echo of the transmitted signal
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathComponent {
    /// Excess delay in samples relative to the direct path
    pub delay: usize,
    /// Amplitude relative to the direct path
    pub amplitude: f32,
}

impl FromStr for PathComponent {
    type Err = SimulationError;

    /// Parse `<delay>:<amplitude>`, e.g. `14:0.4`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SimulationError::InvalidComponent { text: s.to_string() };
        let (delay, amplitude) = s.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            delay: delay.trim().parse().map_err(|_| invalid())?,
            amplitude: amplitude.trim().parse().map_err(|_| invalid())?,
        })
    }
}

/// Pass `input` through a multipath channel
///
/// The direct path (delay 0, amplitude 1) is always present. The output is
/// extended by the largest delay so every echo is kept whole.
///
/// # Arguments
/// * `input` - Transmitted samples
/// * `components` - Additional paths
///
/// # Returns
/// `input.len() + max_delay` received samples
pub fn apply_multipath(input: &[Complex32], components: &[PathComponent]) -> Vec<Complex32> {
    let max_delay = components.iter().map(|c| c.delay).max().unwrap_or(0);
    let mut output = vec![Complex32::new(0.0, 0.0); input.len() + max_delay];
    output[..input.len()].copy_from_slice(input);

    for component in components {
        for (i, s) in input.iter().enumerate() {
            output[i + component.delay] += *s * component.amplitude;
        }
    }

    output
}
