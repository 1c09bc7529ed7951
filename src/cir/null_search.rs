//! NULL symbol detection
//!
//! The NULL symbol carries no transmitted energy, so the window of `T_NULL`
//! samples with the smallest summed magnitude marks the start of the frame.

use num::complex::Complex32;
use tracing::{instrument, trace};

/// Sum of sample magnitudes, used as the frame power for normalization
pub fn frame_magnitude(frame: &[Complex32]) -> f64 {
    frame.iter().map(|s| s.norm() as f64).sum()
}

/// Find the start index of the NULL symbol in one transmission frame
///
/// Windows of `null_len` samples start every `stride` samples across `frame`;
/// a prefix sum of magnitudes makes every window sum O(1).
///
/// # Arguments
/// * `frame` - One transmission frame (`T_TF` samples)
/// * `null_len` - NULL symbol length in samples
/// * `stride` - Step between candidate window starts
///
/// # Returns
/// Start index of the lowest-power window (first one on ties)
#[instrument(skip(frame), fields(frame_len = frame.len()))]
pub fn find_null_symbol(frame: &[Complex32], null_len: usize, stride: usize) -> usize {
    debug_assert!(stride > 0 && null_len > 0 && null_len <= frame.len());

    let mut prefix = Vec::with_capacity(frame.len() + 1);
    prefix.push(0.0f64);
    let mut acc = 0.0f64;
    for s in frame {
        acc += s.norm() as f64;
        prefix.push(acc);
    }

    let mut best_start = 0usize;
    let mut best_sum = f64::INFINITY;
    for start in (0..=frame.len() - null_len).step_by(stride) {
        let sum = prefix[start + null_len] - prefix[start];
        if sum < best_sum {
            best_sum = sum;
            best_start = start;
        }
    }

    trace!(t_null = best_start, window_magnitude = best_sum, "NULL symbol located");
    best_start
}
