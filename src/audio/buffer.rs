//! Hardware byte queues
//!
//! Each device queue is a wait-free single-producer single-consumer ring.
//! The audio callback owns one end and the device's owner the other: capture
//! callbacks produce and the scheduler consumes, playback the other way
//! round. Neither side ever blocks the real-time thread.
//!
//! Only the consumer can remove bytes from the ring, so a clear requested
//! from the producer end is recorded as a byte position and applied by the
//! consumer before its next read.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counters shared by both ends of a queue
#[derive(Debug)]
struct QueueState {
    capacity: usize,
    /// Total bytes ever pushed
    written: AtomicUsize,
    /// Total bytes ever popped or skipped
    read: AtomicUsize,
    /// Bytes before this position are discarded on the next read
    clear_to: AtomicUsize,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl QueueState {
    fn queued(&self) -> usize {
        let written = self.written.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire).max(self.clear_to.load(Ordering::Acquire));
        written.saturating_sub(read)
    }
}

/// Writing end of a byte queue
pub struct QueueProducer {
    ring: HeapProd<u8>,
    state: Arc<QueueState>,
}

impl QueueProducer {
    /// Append a chunk.
    /// Returns false and drops the whole chunk if it does not fit.
    pub fn push(&mut self, data: &[u8]) -> bool {
        if self.ring.vacant_len() < data.len() {
            self.state.overflow_count.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let n = self.ring.push_slice(data);
        self.state.written.fetch_add(n, Ordering::AcqRel);
        true
    }

    /// Discard everything pushed so far. Bytes pushed afterwards are kept.
    pub fn clear(&mut self) {
        let written = self.state.written.load(Ordering::Acquire);
        self.state.clear_to.store(written, Ordering::Release);
    }

    /// Get queued byte count
    pub fn len(&self) -> usize {
        self.state.queued()
    }

    /// Check if queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get capacity in bytes
    pub fn capacity(&self) -> usize {
        self.state.capacity
    }

    /// Get overflow count
    pub fn overflow_count(&self) -> usize {
        self.state.overflow_count.load(Ordering::Relaxed)
    }

    /// Get underrun count
    pub fn underrun_count(&self) -> usize {
        self.state.underrun_count.load(Ordering::Relaxed)
    }
}

/// Reading end of a byte queue
pub struct QueueConsumer {
    ring: HeapCons<u8>,
    state: Arc<QueueState>,
}

impl QueueConsumer {
    fn apply_pending_clear(&mut self) {
        let target = self.state.clear_to.load(Ordering::Acquire);
        let read = self.state.read.load(Ordering::Acquire);
        if target > read {
            let skipped = self.ring.skip(target - read);
            self.state.read.fetch_add(skipped, Ordering::AcqRel);
        }
    }

    /// Move up to `out.len()` bytes into `out`, returning how many were moved
    pub fn pop_into(&mut self, out: &mut [u8]) -> usize {
        self.apply_pending_clear();
        let n = self.ring.pop_slice(out);
        self.state.read.fetch_add(n, Ordering::AcqRel);
        n
    }

    /// Like [`pop_into`](Self::pop_into), counting an underrun on a short read
    pub fn drain_into(&mut self, out: &mut [u8]) -> usize {
        let n = self.pop_into(out);
        if n < out.len() && n > 0 {
            self.state.underrun_count.fetch_add(1, Ordering::Relaxed);
        }
        n
    }

    /// Drop everything queued
    pub fn clear(&mut self) {
        let skipped = self.ring.skip(self.ring.occupied_len());
        self.state.read.fetch_add(skipped, Ordering::AcqRel);
    }

    /// Get queued byte count
    pub fn len(&self) -> usize {
        self.state.queued()
    }

    /// Check if queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get capacity in bytes
    pub fn capacity(&self) -> usize {
        self.state.capacity
    }

    /// Get overflow count
    pub fn overflow_count(&self) -> usize {
        self.state.overflow_count.load(Ordering::Relaxed)
    }

    /// Get underrun count
    pub fn underrun_count(&self) -> usize {
        self.state.underrun_count.load(Ordering::Relaxed)
    }
}

/// Create a queue holding at most `capacity` bytes
pub fn create_byte_queue(capacity: usize) -> (QueueProducer, QueueConsumer) {
    let (producer, consumer) = HeapRb::<u8>::new(capacity).split();
    let state = Arc::new(QueueState {
        capacity,
        written: AtomicUsize::new(0),
        read: AtomicUsize::new(0),
        clear_to: AtomicUsize::new(0),
        overflow_count: AtomicUsize::new(0),
        underrun_count: AtomicUsize::new(0),
    });

    (
        QueueProducer {
            ring: producer,
            state: state.clone(),
        },
        QueueConsumer { ring: consumer, state },
    )
}
