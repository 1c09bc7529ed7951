//! Correlation against the phase reference symbol

use num::complex::{Complex32, Complex64};
use rayon::prelude::*;
use tracing::instrument;

use super::reference::ReferenceSymbol;
use super::CirError;

/// Magnitude of the correlation coefficient between `window` and the reference
///
/// Equivalent to `|corrcoef(window, reference)[0, 1]|`: both sequences are
/// mean-removed, so the result is bounded to [0, 1] and insensitive to the
/// window's gain. A window with no variance correlates to 0.
pub fn correlation_magnitude(window: &[Complex32], reference: &ReferenceSymbol) -> f32 {
    debug_assert_eq!(window.len(), reference.len());

    let mut cross = Complex64::new(0.0, 0.0);
    let mut sum = Complex64::new(0.0, 0.0);
    let mut power = 0.0f64;

    for (x, r) in window.iter().zip(reference.centered()) {
        let x = Complex64::new(x.re as f64, x.im as f64);
        let r = Complex64::new(r.re as f64, r.im as f64);
        // Reference is centered, so sum(x * conj(r)) is already the covariance
        cross += x * r.conj();
        sum += x;
        power += x.norm_sqr();
    }

    let n = window.len() as f64;
    let variance = power - sum.norm_sqr() / n;
    if variance <= f64::EPSILON * power.max(1.0) {
        return 0.0;
    }

    let rho = cross.norm() / (variance * reference.energy()).sqrt();
    rho.clamp(0.0, 1.0) as f32
}

/// Correlation magnitude at every delay in `0..max_delay` from `corr_start`
///
/// Delays are independent and evaluated in parallel; the output is in delay order.
///
/// # Returns
/// `max_delay` coefficients, or `InsufficientSamples` if the last window would
/// run past the end of `samples`
#[instrument(skip(samples, reference), fields(samples_len = samples.len()))]
pub fn delay_sweep(
    samples: &[Complex32],
    corr_start: usize,
    max_delay: usize,
    reference: &ReferenceSymbol,
) -> Result<Vec<f32>, CirError> {
    let n = reference.len();
    let required = corr_start + max_delay + n;
    if samples.len() < required {
        return Err(CirError::InsufficientSamples {
            required,
            available: samples.len(),
        });
    }

    Ok((0..max_delay)
        .into_par_iter()
        .map(|d| {
            let start = corr_start + d;
            correlation_magnitude(&samples[start..start + n], reference)
        })
        .collect())
}

/// Autocorrelation coefficient magnitude of `x` at lags `0..length`
///
/// Lag 0 is 1 by definition. Lag `i` correlates `x[..len - i]` with `x[i..]`, so
/// a multipath channel shows up as peaks at its echo delays without needing the
/// phase reference. Lags at or past the end of `x` are 0.
pub fn autocorrelate(x: &[Complex32], length: usize) -> Vec<f32> {
    (0..length)
        .into_par_iter()
        .map(|lag| match lag {
            0 => 1.0,
            lag if lag >= x.len() => 0.0,
            lag => coefficient(&x[..x.len() - lag], &x[lag..]),
        })
        .collect()
}

/// `|corrcoef(a, b)|` for two sequences of equal length, neither pre-centered
fn coefficient(a: &[Complex32], b: &[Complex32]) -> f32 {
    let n = a.len() as f64;
    let mut sum_a = Complex64::new(0.0, 0.0);
    let mut sum_b = Complex64::new(0.0, 0.0);
    let mut cross = Complex64::new(0.0, 0.0);
    let mut power_a = 0.0f64;
    let mut power_b = 0.0f64;

    for (x, y) in a.iter().zip(b) {
        let x = Complex64::new(x.re as f64, x.im as f64);
        let y = Complex64::new(y.re as f64, y.im as f64);
        sum_a += x;
        sum_b += y;
        cross += x * y.conj();
        power_a += x.norm_sqr();
        power_b += y.norm_sqr();
    }

    let covariance = cross - sum_a * sum_b.conj() / n;
    let var_a = power_a - sum_a.norm_sqr() / n;
    let var_b = power_b - sum_b.norm_sqr() / n;
    if var_a <= f64::EPSILON * power_a.max(1.0) || var_b <= f64::EPSILON * power_b.max(1.0) {
        return 0.0;
    }

    (covariance.norm() / (var_a * var_b).sqrt()).clamp(0.0, 1.0) as f32
}
