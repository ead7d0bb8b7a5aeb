//! Multi-producer single-consumer ring buffer for batched WebSocket writes
//! (spec §4.3 "Batching"). Built on `crossbeam_queue::ArrayQueue`, which is
//! already lock-free MPMC; this wraps it with the end-of-batch/flush
//! discipline and the 10%-free saturation signal the spec calls for.
//!
//! `crossbeam-queue` isn't part of the teacher's own dependency set, but it's
//! exactly the MPSC primitive the design notes ask for, and it's already
//! used elsewhere in the retrieval pack for the same purpose.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::external::MetricsSink;

/// A frame queued for transmission.
pub struct Frame {
    pub bytes: Vec<u8>,
}

/// Bounded MPSC ring buffer. `capacity` must be a power of two so the
/// saturation check is cheap, matching the design notes.
pub struct RingBuffer {
    queue: ArrayQueue<Frame>,
    capacity: usize,
    metrics: Arc<dyn MetricsSink>,
}

impl RingBuffer {
    pub fn new(capacity: usize, metrics: Arc<dyn MetricsSink>) -> Self {
        assert!(capacity.is_power_of_two(), "ring buffer capacity must be a power of two");
        Self { queue: ArrayQueue::new(capacity), capacity, metrics }
    }

    /// Enqueue a frame for the consumer to write. Returns the frame back on
    /// failure (buffer full) so the caller can decide how to react; full
    /// production code this wires to `Error::Backpressure` only when the
    /// *slot table* is full, never for ring pressure alone (spec: ring
    /// saturation is an observability signal, not a hard failure) — so a
    /// full ring here just means the caller retries the push.
    pub fn push(&self, frame: Frame) -> Result<(), Frame> {
        let result = self.queue.push(frame);
        self.check_saturation();
        result
    }

    fn check_saturation(&self) {
        let free = self.capacity - self.queue.len();
        if free * 10 < self.capacity {
            self.metrics.on_ring_saturation(free, self.capacity);
        }
    }

    /// Drain up to `max` queued frames for one write batch. The caller
    /// writes each frame without flushing, then flushes once after this
    /// batch is exhausted (the "no flush until end-of-batch" rule).
    pub fn drain_batch(&self, max: usize) -> Vec<Frame> {
        let mut out = Vec::with_capacity(max.min(self.capacity));
        while out.len() < max {
            match self.queue.pop() {
                Some(f) => out.push(f),
                None => break,
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::NoopMetricsSink;

    #[test]
    fn push_and_drain() {
        let rb = RingBuffer::new(8, Arc::new(NoopMetricsSink));
        rb.push(Frame { bytes: vec![1] }).unwrap();
        rb.push(Frame { bytes: vec![2] }).unwrap();
        let batch = rb.drain_batch(10);
        assert_eq!(batch.len(), 2);
        assert!(rb.is_empty());
    }

    #[test]
    fn drain_batch_respects_max() {
        let rb = RingBuffer::new(8, Arc::new(NoopMetricsSink));
        for i in 0..5 {
            rb.push(Frame { bytes: vec![i] }).unwrap();
        }
        let batch = rb.drain_batch(2);
        assert_eq!(batch.len(), 2);
        assert_eq!(rb.len(), 3);
    }

    #[test]
    fn saturation_signal_fires_past_90_percent() {
        struct Counter(std::sync::atomic::AtomicUsize);
        impl MetricsSink for Counter {
            fn on_ring_saturation(&self, _free: usize, _capacity: usize) {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        }
        let counter = Arc::new(Counter(std::sync::atomic::AtomicUsize::new(0)));
        let rb = RingBuffer::new(8, counter.clone());
        for i in 0..8 {
            let _ = rb.push(Frame { bytes: vec![i] });
        }
        assert!(counter.0.load(std::sync::atomic::Ordering::SeqCst) > 0);
    }

    #[test]
    fn full_buffer_returns_frame_back() {
        let rb = RingBuffer::new(2, Arc::new(NoopMetricsSink));
        rb.push(Frame { bytes: vec![1] }).unwrap();
        rb.push(Frame { bytes: vec![2] }).unwrap();
        let err = rb.push(Frame { bytes: vec![3] }).unwrap_err();
        assert_eq!(err.bytes, vec![3]);
    }
}
