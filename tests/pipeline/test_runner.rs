//! Periodic runner cycles over failing and healthy capture windows

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rustycir::cir::{CirConfig, MAX_COMPONENT_DELAY, REFERENCE_LEN, T_NULL, T_TF};
use rustycir::iq::{self, IqFormat};
use rustycir::render::RenderError;
use rustycir::runner::{CaptureCycle, CycleOutcome, RunnerState};
use rustycir::{CirBatch, CirSink, PeriodicRunner, RunnerConfig, SampleSource, StreamBuffer};

#[path = "../test_utils.rs"]
mod test_utils;
use test_utils::{reference_symbol, synthetic_capture, FrameLayout};

/// Records every published batch
#[derive(Clone, Default)]
struct RecordingSink(Arc<Mutex<Vec<CirBatch>>>);

impl CirSink for RecordingSink {
    fn publish(&mut self, batch: &CirBatch) -> Result<(), RenderError> {
        self.0.lock().unwrap().push(batch.clone());
        Ok(())
    }
}

/// Serves the same window each call, but an odd-length one on every third call
struct FlakySource {
    window: Vec<u8>,
    calls: AtomicUsize,
}

impl SampleSource for FlakySource {
    fn try_take(&self, n: usize) -> Option<Vec<u8>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call % 3 == 0 {
            return Some(vec![127u8; n - 1]);
        }
        Some(self.window[..n].to_vec())
    }
}

fn small_cir() -> CirConfig {
    CirConfig {
        transmission_frame_len: 600,
        null_symbol_len: 50,
        search_stride: 5,
        guard: 10,
        max_component_delay: 20,
        reference_len: 32,
    }
}

#[test]
fn test_every_third_decode_failure_is_contained() {
    let reference = reference_symbol(32, 7);
    let capture = synthetic_capture(
        &FrameLayout {
            len: 1000,
            null_at: 200,
            null_len: 50,
            reference_at: 250,
            reference_gain: 0.3,
            noise_sigma: 0.2,
            seed: 8,
        },
        reference.samples(),
    );
    let source = FlakySource {
        window: iq::encode_u8(&capture),
        calls: AtomicUsize::new(0),
    };

    let config = RunnerConfig {
        interval: Duration::from_millis(1),
        window_samples: 1000,
        format: IqFormat::U8,
        max_cycles: Some(10),
        cir: small_cir(),
    };
    let sink = RecordingSink::default();
    let mut runner = PeriodicRunner::new(config, reference).unwrap();
    runner.start(source, sink.clone()).unwrap();

    let stats = runner.wait().unwrap();
    assert_eq!(runner.state(), RunnerState::Stopped);
    assert_eq!(stats.cycles, 10);
    assert_eq!(stats.failed, 3);
    assert_eq!(stats.published, 7);

    let batches = sink.0.lock().unwrap();
    let cycles: Vec<u64> = batches.iter().map(|b| b.cycle).collect();
    assert_eq!(cycles, vec![1, 2, 4, 5, 7, 8, 10]);
    for batch in batches.iter() {
        assert_eq!(batch.profiles.len(), 1);
        assert_eq!(batch.profiles[0].null_index, 200);
    }
}

#[test]
fn test_u8_capture_through_buffer() {
    let reference = reference_symbol(REFERENCE_LEN, 9);
    let window_samples = T_TF + MAX_COMPONENT_DELAY + REFERENCE_LEN;

    // Scaled to stay inside the u8 range
    let capture = synthetic_capture(
        &FrameLayout {
            len: window_samples,
            null_at: 2000,
            null_len: T_NULL,
            reference_at: 4606,
            reference_gain: 0.1,
            noise_sigma: 0.2,
            seed: 10,
        },
        reference.samples(),
    );

    let config = RunnerConfig {
        window_samples,
        ..RunnerConfig::default()
    };
    let buffer = Arc::new(StreamBuffer::for_window(window_samples, IqFormat::U8));
    let sink = RecordingSink::default();
    let mut cycle = CaptureCycle::new(Arc::clone(&buffer), sink.clone(), reference, config);

    assert_eq!(cycle.run_once().unwrap(), CycleOutcome::NoData);

    let raw = iq::encode_u8(&capture);
    let (head, tail) = raw.split_at(raw.len() / 2);
    buffer.push(head);
    assert_eq!(cycle.run_once().unwrap(), CycleOutcome::NoData);
    buffer.push(tail);
    assert_eq!(cycle.run_once().unwrap(), CycleOutcome::Published { frames: 1 });
    assert!(buffer.is_empty());

    let batches = sink.0.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].cycle, 3);
    let profile = &batches[0].profiles[0];
    assert_eq!(profile.null_index, 2000);
    assert_eq!(profile.peak().map(|(d, _)| d), Some(0));
    assert!(profile.coefficients()[0] > 0.95);
}

#[test]
fn test_stop_while_running() {
    let reference = reference_symbol(32, 11);
    let config = RunnerConfig {
        interval: Duration::from_millis(5),
        window_samples: 1000,
        cir: small_cir(),
        ..RunnerConfig::default()
    };
    let buffer = Arc::new(StreamBuffer::new(4000));
    let mut runner = PeriodicRunner::new(config, reference).unwrap();
    runner.start(Arc::clone(&buffer), RecordingSink::default()).unwrap();

    std::thread::sleep(Duration::from_millis(50));
    let stats = runner.stop().unwrap();
    assert_eq!(runner.state(), RunnerState::Stopped);
    assert_eq!(stats.published, 0);
    assert_eq!(stats.cycles, stats.empty);
}
