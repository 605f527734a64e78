//! Ordered multi-producer / single-consumer queue of work items.
//!
//! Wraps either a bounded or an unbounded tokio mpsc channel behind one
//! sender and one receiver type. The receiver is owned by the consumer loop,
//! which makes concurrent dequeues impossible.

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::error::{ExecutorError, Result};
use crate::work_item::WorkItem;

#[derive(Debug, Clone)]
pub(crate) enum QueueSender {
    Bounded(mpsc::Sender<WorkItem>),
    Unbounded(mpsc::UnboundedSender<WorkItem>),
}

#[derive(Debug)]
pub(crate) enum QueueReceiver {
    Bounded(mpsc::Receiver<WorkItem>),
    Unbounded(mpsc::UnboundedReceiver<WorkItem>),
}

/// Create a queue; `None` capacity means unbounded.
pub(crate) fn channel(capacity: Option<usize>) -> (QueueSender, QueueReceiver) {
    match capacity {
        Some(capacity) => {
            let (tx, rx) = mpsc::channel(capacity);
            (QueueSender::Bounded(tx), QueueReceiver::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (QueueSender::Unbounded(tx), QueueReceiver::Unbounded(rx))
        }
    }
}

impl QueueSender {
    /// Enqueue without waiting. Fails with `QueueFull` on a full bounded queue.
    pub(crate) fn try_push(&self, item: WorkItem) -> Result<()> {
        match self {
            QueueSender::Bounded(tx) => tx.try_send(item.stamp()).map_err(|e| match e {
                TrySendError::Full(_) => ExecutorError::QueueFull,
                TrySendError::Closed(_) => ExecutorError::Closed,
            }),
            QueueSender::Unbounded(tx) => tx
                .send(item.stamp())
                .map_err(|_| ExecutorError::Closed),
        }
    }

    /// Enqueue, waiting for room on a bounded queue while observing `token`.
    ///
    /// If the token fires first the item is dropped unqueued.
    pub(crate) async fn push(&self, item: WorkItem, token: &CancellationToken) -> Result<()> {
        match self {
            QueueSender::Bounded(tx) => {
                let permit = tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(ExecutorError::Cancelled),
                    permit = tx.reserve() => permit.map_err(|_| ExecutorError::Closed)?,
                };
                permit.send(item.stamp());
                Ok(())
            }
            QueueSender::Unbounded(_) => {
                if token.is_cancelled() {
                    return Err(ExecutorError::Cancelled);
                }
                self.try_push(item)
            }
        }
    }
}

impl QueueReceiver {
    pub(crate) async fn recv(&mut self) -> Option<WorkItem> {
        match self {
            QueueReceiver::Bounded(rx) => rx.recv().await,
            QueueReceiver::Unbounded(rx) => rx.recv().await,
        }
    }

    pub(crate) fn try_recv(&mut self) -> Option<WorkItem> {
        match self {
            QueueReceiver::Bounded(rx) => rx.try_recv().ok(),
            QueueReceiver::Unbounded(rx) => rx.try_recv().ok(),
        }
    }

    /// Stop accepting new items; already queued items stay receivable.
    pub(crate) fn close(&mut self) {
        match self {
            QueueReceiver::Bounded(rx) => rx.close(),
            QueueReceiver::Unbounded(rx) => rx.close(),
        }
    }
}
