//! Executor counters and their serializable snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time metrics for an executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorMetrics {
    /// Actions accepted onto the queue.
    pub enqueued: u64,
    /// Actions that ran, successfully or not.
    pub executed: u64,
    pub failed: u64,
    /// Actions discarded without running.
    pub cancelled: u64,
    /// Flush markers reached by the consumer.
    pub flushes: u64,
    pub batches_opened: u64,
    pub batches_closed: u64,
}

impl ExecutorMetrics {
    /// Actions accepted but not yet run or discarded.
    pub fn pending(&self) -> u64 {
        self.enqueued
            .saturating_sub(self.executed.saturating_add(self.cancelled))
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) enqueued: AtomicU64,
    pub(crate) executed: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) cancelled: AtomicU64,
    pub(crate) flushes: AtomicU64,
    pub(crate) batches_opened: AtomicU64,
    pub(crate) batches_closed: AtomicU64,
}

impl Counters {
    pub(crate) fn snapshot(&self) -> ExecutorMetrics {
        ExecutorMetrics {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            batches_opened: self.batches_opened.load(Ordering::Relaxed),
            batches_closed: self.batches_closed.load(Ordering::Relaxed),
        }
    }
}
