use num::complex::Complex32;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use super::SimulationError;

/// RMS amplitude of a complex signal
pub fn rms_power(signal: &[Complex32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = signal.iter().map(|s| s.norm_sqr() as f64).sum();
    (sum_squares / signal.len() as f64).sqrt() as f32
}

/// Complex Gaussian samples with standard deviation `sigma` per axis
pub fn complex_gaussian(num_samples: usize, sigma: f32, seed: u64) -> Result<Vec<Complex32>, SimulationError> {
    let normal = Normal::new(0.0f32, sigma).map_err(|_| SimulationError::InvalidNoise { value: sigma })?;
    let mut rng = StdRng::seed_from_u64(seed);

    Ok((0..num_samples)
        .map(|_| Complex32::new(normal.sample(&mut rng), normal.sample(&mut rng)))
        .collect())
}

/// Add white Gaussian noise at `snr_db` relative to the signal's own power
pub fn add_awgn(samples: &mut [Complex32], snr_db: f32, seed: u64) -> Result<(), SimulationError> {
    if !snr_db.is_finite() {
        return Err(SimulationError::InvalidNoise { value: snr_db });
    }

    let signal_power = rms_power(samples).powi(2);
    let noise_power = signal_power / 10f32.powf(snr_db / 10.0);
    // Split evenly between I and Q
    let sigma = (noise_power / 2.0).sqrt();

    let noise = complex_gaussian(samples.len(), sigma, seed)?;
    for (s, n) in samples.iter_mut().zip(noise) {
        *s += n;
    }
    Ok(())
}
