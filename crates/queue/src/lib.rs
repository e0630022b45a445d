#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! The bounded, mutex-guarded point queue that sits between the scheduler's
//! ingress channel and the batcher/sender.
//!
//! Overflow policy is drop-newest: once the buffer is at `max_len`, a plain
//! [`BoundedQueue::push`] is rejected and counted. The sender's retry path
//! uses [`BoundedQueue::requeue_front`] instead, which always succeeds by
//! dropping from the *tail* if necessary — on retry we'd rather lose newer,
//! never-sent points than the older batch we're trying again (see the
//! pipeline's retry semantics).

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
    time::{Duration, Instant},
};

use model::DataPoint;

/// The default maximum queue length, matching the source agent's default.
pub const DEFAULT_MAX_QUEUE_LEN: usize = 1_000_000;

/// How often an overflow warning may be logged, regardless of how many
/// points are dropped in that window.
const OVERFLOW_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// A point count snapshot of the queue, used by self-telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// The number of points currently buffered.
    pub len: usize,
    /// The cumulative number of points dropped for overflow.
    pub dropped: u64,
    /// The cumulative number of points ever pushed (pre-overflow).
    pub enqueued_total: u64,
}

/// A length-bounded FIFO buffer of [`DataPoint`]s with drop-newest overflow.
///
/// Every operation takes `&self`; interior mutability is a single
/// [`Mutex`]-guarded [`VecDeque`] plus atomic counters for the stats that
/// self-telemetry reads far more often than the queue is mutated.
pub struct BoundedQueue {
    buffer: Mutex<VecDeque<DataPoint>>,
    max_len: usize,
    dropped: AtomicU64,
    enqueued_total: AtomicU64,
    last_overflow_log: Mutex<Option<Instant>>,
}

impl BoundedQueue {
    /// Creates an empty queue bounded at `max_len` points.
    pub fn new(max_len: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::new()),
            max_len,
            dropped: AtomicU64::new(0),
            enqueued_total: AtomicU64::new(0),
            last_overflow_log: Mutex::new(None),
        }
    }

    /// Appends `point` to the tail, non-blocking. Returns `false` and counts
    /// a drop if the queue is already at `max_len`.
    pub fn push(&self, point: DataPoint) -> bool {
        let _ = self.enqueued_total.fetch_add(1, Ordering::Relaxed);
        let mut buffer = self.buffer.lock().expect("queue lock poisoned");
        if buffer.len() >= self.max_len {
            drop(buffer);
            self.record_overflow();
            return false;
        }
        buffer.push_back(point);
        true
    }

    /// Re-enqueues `points` at the *head* of the queue, as the sender does
    /// on transport failure. Unlike [`BoundedQueue::push`], this always
    /// accepts every point: if the queue would exceed `max_len`, points are
    /// dropped from the *tail* (the newest, never-sent points) to make room,
    /// preferring to keep the batch that already tried once.
    pub fn requeue_front(&self, points: Vec<DataPoint>) {
        if points.is_empty() {
            return;
        }
        let mut buffer = self.buffer.lock().expect("queue lock poisoned");
        for point in points.into_iter().rev() {
            if buffer.len() >= self.max_len {
                let _ = buffer.pop_back();
                drop(buffer);
                self.record_overflow();
                buffer = self.buffer.lock().expect("queue lock poisoned");
            }
            buffer.push_front(point);
        }
    }

    /// Removes and returns up to `n` points from the head, in FIFO order.
    pub fn drain(&self, n: usize) -> Vec<DataPoint> {
        let mut buffer = self.buffer.lock().expect("queue lock poisoned");
        let take = n.min(buffer.len());
        buffer.drain(..take).collect()
    }

    /// Returns the current length, dropped count, and total-ever-enqueued
    /// count.
    pub fn stats(&self) -> Stats {
        Stats {
            len: self.buffer.lock().expect("queue lock poisoned").len(),
            dropped: self.dropped.load(Ordering::Relaxed),
            enqueued_total: self.enqueued_total.load(Ordering::Relaxed),
        }
    }

    /// Returns the current number of buffered points.
    pub fn len(&self) -> usize {
        self.buffer.lock().expect("queue lock poisoned").len()
    }

    /// Returns `true` if the queue currently holds no points.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the configured maximum length.
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    fn record_overflow(&self) {
        let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
        let mut last = self.last_overflow_log.lock().expect("overflow-log lock poisoned");
        let now = Instant::now();
        let should_log = last.map(|t| now.duration_since(t) >= OVERFLOW_LOG_INTERVAL).unwrap_or(true);
        if should_log {
            *last = Some(now);
            tracing::warn!(
                dropped_total = self.dropped.load(Ordering::Relaxed),
                max_len = self.max_len,
                "queue overflow, dropping points (logged at most every 10s)"
            );
        }
    }
}

/// Drains a `flume` ingress channel into a [`BoundedQueue`], batching
/// opportunistically: once the task wakes for one point, it keeps draining
/// the channel without releasing the queue lock until either the channel is
/// empty or the queue is full, amortizing lock acquisition under high
/// ingest rates.
///
/// Runs until `ingress` is closed (every sender dropped), at which point it
/// returns. The queue itself never blocks; this task is the only writer that
/// can observe backpressure, and it never exerts any back onto callers of
/// `ingress.send`.
pub async fn run_ingestor(ingress: flume::Receiver<DataPoint>, queue: std::sync::Arc<BoundedQueue>) {
    while let Ok(first) = ingress.recv_async().await {
        let _ = queue.push(first);
        while let Ok(point) = ingress.try_recv() {
            let _ = queue.push(point);
        }
    }
    tracing::info!("queue ingestor exiting: ingress channel closed");
}

#[cfg(test)]
mod test {
    use model::TagSet;

    use super::*;

    fn point(n: i64) -> DataPoint {
        DataPoint::new("test.metric", n, n, TagSet::new()).unwrap()
    }

    #[test]
    fn push_accepts_until_capacity() {
        let queue = BoundedQueue::new(2);
        assert!(queue.push(point(1)));
        assert!(queue.push(point(2)));
        assert!(!queue.push(point(3)));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.stats().dropped, 1);
    }

    #[test]
    fn drain_removes_from_head_in_order() {
        let queue = BoundedQueue::new(10);
        for i in 0..5 {
            assert!(queue.push(point(i)));
        }
        let drained = queue.drain(3);
        assert_eq!(drained.iter().map(|p| p.timestamp).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn drain_caps_at_available_length() {
        let queue = BoundedQueue::new(10);
        assert!(queue.push(point(1)));
        assert_eq!(queue.drain(100).len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn requeue_front_goes_ahead_of_existing_points() {
        let queue = BoundedQueue::new(10);
        assert!(queue.push(point(99)));
        queue.requeue_front(vec![point(1), point(2)]);
        let drained = queue.drain(3);
        assert_eq!(
            drained.iter().map(|p| p.timestamp).collect::<Vec<_>>(),
            vec![1, 2, 99]
        );
    }

    #[test]
    fn requeue_front_drops_from_tail_when_saturated() {
        let queue = BoundedQueue::new(2);
        assert!(queue.push(point(1)));
        assert!(queue.push(point(2)));
        queue.requeue_front(vec![point(10), point(11)]);
        // the two newest (tail) points, 1 and 2, are dropped to make room
        // for the retried batch at the head.
        let drained = queue.drain(10);
        assert_eq!(drained.iter().map(|p| p.timestamp).collect::<Vec<_>>(), vec![10, 11]);
        assert_eq!(queue.stats().dropped, 2);
    }

    #[test]
    fn stats_reports_enqueued_total_including_drops() {
        let queue = BoundedQueue::new(1);
        assert!(queue.push(point(1)));
        assert!(!queue.push(point(2)));
        let stats = queue.stats();
        assert_eq!(stats.enqueued_total, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.len, 1);
    }

    #[tokio::test]
    async fn ingestor_drains_until_channel_closed() {
        let (tx, rx) = flume::unbounded();
        let queue = std::sync::Arc::new(BoundedQueue::new(10));
        for i in 0..5 {
            tx.send(point(i)).unwrap();
        }
        drop(tx);
        run_ingestor(rx, queue.clone()).await;
        assert_eq!(queue.len(), 5);
    }
}
