//! Bounded Streaming Buffer
//!
//! Byte FIFO between the device receiver thread (producer) and the periodic
//! analysis runner (consumer).
//!
//! **Overflow policy**: drop-oldest. The producer never blocks on the consumer;
//! when a push would grow the queue past capacity the oldest bytes are evicted
//! so the retained data is always the most recent suffix of the stream.
//!
//! **Locking**: one mutex guards the queue. `push` (append + evict) and
//! `try_take` (length check + removal) each run entirely under that lock.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::iq::IqFormat;

#[derive(Debug, Default)]
struct Inner {
    bytes: VecDeque<u8>,
    evicted: u64,
}

/// Bounded drop-oldest byte queue shared by one producer and one consumer
#[derive(Debug)]
pub struct StreamBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl StreamBuffer {
    /// Create a buffer holding at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                bytes: VecDeque::with_capacity(capacity),
                evicted: 0,
            }),
            capacity,
        }
    }

    /// Create a buffer sized for a consumer that takes `window_samples` per cycle
    ///
    /// Capacity is twice the per-cycle requirement in bytes, so producer and
    /// consumer can drift without starving the consumer while staleness stays bounded.
    pub fn for_window(window_samples: usize, format: IqFormat) -> Self {
        Self::new(2 * window_samples * format.bytes_per_sample())
    }

    /// Maximum number of retained bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes currently buffered
    pub fn len(&self) -> usize {
        self.lock().bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes dropped by the overflow policy since creation
    pub fn evicted_bytes(&self) -> u64 {
        self.lock().evicted
    }

    /// Discard all buffered bytes
    pub fn clear(&self) {
        self.lock().bytes.clear();
    }

    /// Append bytes at the tail, evicting from the head if over capacity
    pub fn push(&self, data: &[u8]) {
        let mut inner = self.lock();
        inner.bytes.extend(data);

        let len = inner.bytes.len();
        if len > self.capacity {
            let excess = len - self.capacity;
            inner.bytes.drain(..excess);
            inner.evicted += excess as u64;
            trace!(excess, capacity = self.capacity, "evicted oldest bytes");
        }
    }

    /// Remove and return the oldest `n` bytes if at least `n` are buffered
    ///
    /// Never blocks on data and never removes a partial block: with fewer than
    /// `n` bytes available the buffer is left untouched and `None` is returned.
    pub fn try_take(&self, n: usize) -> Option<Vec<u8>> {
        let mut inner = self.lock();
        if inner.bytes.len() < n {
            return None;
        }
        Some(inner.bytes.drain(..n).collect())
    }

    // The queue holds plain bytes, so a panic mid-push cannot leave it invalid
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
