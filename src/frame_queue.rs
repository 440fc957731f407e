// SPDX-License-Identifier: MPL-2.0

//! Bounded, blocking frame queue between the producer and the scheduler.
//!
//! ```text
//! ┌─────────────┐
//! │ Producer    │
//! └─────┬───────┘
//!       │ push() - blocks while full (bounded wait)
//!       ▼
//! ┌─────────────┐
//! │ Frame Queue │  ← bounded (`queue_capacity` frames)
//! └─────┬───────┘
//!       │ pop() - blocks while empty (bounded wait)
//!       ▼
//! ┌─────────────┐
//! │ Scheduler   │
//! └─────────────┘
//! ```
//!
//! # Key Guarantees
//!
//! - **FIFO**: frames come out in exactly the order they went in
//! - **Backpressure**: a full queue makes the producer wait, nothing is dropped
//! - **Bounded waits**: both sides return after a timeout so they can
//!   re-check the pipeline state

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::frame::FrameRecord;

/// Result of a bounded push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum PushOutcome {
    Pushed,
    /// The queue stayed full for the whole wait. The frame was not queued.
    TimedOut,
    /// The queue was closed.
    Closed,
}

/// Statistics about frame queue operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Total frames pushed to the queue.
    pub frames_pushed: u64,
    /// Frames taken by the scheduler.
    pub frames_popped: u64,
    /// Pushes that gave up because the queue stayed full.
    pub push_timeouts: u64,
    /// Pops that gave up because the queue stayed empty.
    pub pop_timeouts: u64,
}

#[derive(Debug)]
struct Inner {
    frames: VecDeque<FrameRecord>,
    closed: bool,
}

/// A bounded, thread-safe frame queue for playback.
///
/// Single producer, single consumer.
#[derive(Debug)]
pub struct FrameQueue {
    inner: Mutex<Inner>,
    /// Signalled when a frame was pushed or the queue closed.
    not_empty: Condvar,
    /// Signalled when a frame was popped or the queue closed.
    not_full: Condvar,
    capacity: usize,
    stats_pushed: AtomicU64,
    stats_popped: AtomicU64,
    stats_push_timeouts: AtomicU64,
    stats_pop_timeouts: AtomicU64,
}

impl FrameQueue {
    /// Create a queue holding at most `capacity` frames (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);

        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            stats_pushed: AtomicU64::new(0),
            stats_popped: AtomicU64::new(0),
            stats_push_timeouts: AtomicU64::new(0),
            stats_pop_timeouts: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push a frame, waiting up to `timeout` for room.
    pub fn push(&self, frame: FrameRecord, timeout: Duration) -> PushOutcome {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();

        loop {
            if inner.closed {
                return PushOutcome::Closed;
            }
            if inner.frames.len() < self.capacity {
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                self.stats_push_timeouts.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(len = inner.frames.len(), "Push timed out: queue full");
                return PushOutcome::TimedOut;
            }

            inner = self
                .not_full
                .wait_timeout(inner, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }

        inner.frames.push_back(frame);
        drop(inner);

        self.stats_pushed.fetch_add(1, Ordering::Relaxed);
        self.not_empty.notify_one();
        PushOutcome::Pushed
    }

    /// Pop the oldest frame, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout or once the queue is closed and drained.
    pub fn pop(&self, timeout: Duration) -> Option<FrameRecord> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();

        let frame = loop {
            if let Some(frame) = inner.frames.pop_front() {
                break frame;
            }
            if inner.closed {
                return None;
            }

            let now = Instant::now();
            if now >= deadline {
                self.stats_pop_timeouts.fetch_add(1, Ordering::Relaxed);
                return None;
            }

            inner = self
                .not_empty
                .wait_timeout(inner, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        };
        drop(inner);

        self.stats_popped.fetch_add(1, Ordering::Relaxed);
        self.not_full.notify_one();
        Some(frame)
    }

    /// Wake both sides and refuse further pushes. Queued frames can still be popped.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Get current queue length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get queue statistics.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            frames_pushed: self.stats_pushed.load(Ordering::Relaxed),
            frames_popped: self.stats_popped.load(Ordering::Relaxed),
            push_timeouts: self.stats_push_timeouts.load(Ordering::Relaxed),
            pop_timeouts: self.stats_pop_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Shared handle to a frame queue.
pub type SharedFrameQueue = Arc<FrameQueue>;

/// Create a new shared frame queue.
pub fn new_shared_queue(capacity: usize) -> SharedFrameQueue {
    Arc::new(FrameQueue::new(capacity))
}
