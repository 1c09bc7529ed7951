//! Echo detection through the simulated multipath channel

use rustycir::cir::{CirConfig, CirEstimator, GUARD, MAX_COMPONENT_DELAY, REFERENCE_LEN, T_NULL, T_TF};
use rustycir::simulation::{add_awgn, apply_multipath, PathComponent};

#[path = "../test_utils.rs"]
mod test_utils;
use test_utils::{reference_symbol, synthetic_capture, FrameLayout};

const REQUIRED: usize = T_TF + MAX_COMPONENT_DELAY + REFERENCE_LEN;

fn transmitted(seed: u64) -> (std::sync::Arc<rustycir::ReferenceSymbol>, Vec<num::complex::Complex32>) {
    let reference = reference_symbol(REFERENCE_LEN, seed);
    let samples = synthetic_capture(
        &FrameLayout {
            len: REQUIRED,
            null_at: 60_000,
            null_len: T_NULL,
            reference_at: 60_000 + T_NULL,
            reference_gain: 1.0,
            noise_sigma: 0.3,
            seed: seed + 1,
        },
        reference.samples(),
    );
    (reference, samples)
}

#[test]
fn test_echoes_appear_at_their_delays() {
    let (reference, clean) = transmitted(40);
    let paths = ["14:0.4", "25:0.3"]
        .iter()
        .map(|s| s.parse::<PathComponent>().unwrap())
        .collect::<Vec<_>>();
    let received = apply_multipath(&clean, &paths);

    let mut estimator = CirEstimator::new(reference, CirConfig::default()).unwrap();
    let profile = estimator.estimate(&received).unwrap();
    assert_eq!(estimator.null_indices(), &[60_000]);

    let delays: Vec<usize> = profile.strongest(3).into_iter().map(|(d, _)| d).collect();
    assert_eq!(delays, vec![GUARD, GUARD + 14, GUARD + 25]);

    // Everything away from the three paths stays near the noise floor
    let direct = profile.coefficients()[GUARD];
    let floor = profile
        .coefficients()
        .iter()
        .enumerate()
        .filter(|(d, _)| ![GUARD, GUARD + 14, GUARD + 25].contains(d))
        .map(|(_, &c)| c)
        .fold(0.0f32, f32::max);
    assert!(floor < 0.15 * direct, "floor {} direct {}", floor, direct);
}

#[test]
fn test_direct_path_survives_noise() {
    let (reference, clean) = transmitted(50);
    let mut received = apply_multipath(&clean, &[PathComponent { delay: 40, amplitude: 0.5 }]);
    add_awgn(&mut received, 10.0, 7).unwrap();

    let mut estimator = CirEstimator::new(reference, CirConfig::default()).unwrap();
    let profile = estimator.estimate(&received).unwrap();

    let strongest = profile.strongest(2);
    assert_eq!(strongest[0].0, GUARD);
    assert_eq!(strongest[1].0, GUARD + 40);
    assert!(strongest[0].1 > strongest[1].1);
}
