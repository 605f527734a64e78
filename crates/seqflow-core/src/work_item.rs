//! Units of work carried through the executor queue.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::batch::GroupShared;
use crate::error::{ActionError, BoxError, ExecutorError, Result};

/// A queued, zero-argument fallible action.
pub type Action = Box<dyn FnOnce() -> std::result::Result<(), BoxError> + Send + 'static>;

/// Box a closure into an [`Action`].
pub(crate) fn boxed<F, E>(f: F) -> Action
where
    F: FnOnce() -> std::result::Result<(), E> + Send + 'static,
    E: Into<BoxError>,
{
    Box::new(move || f().map_err(Into::into))
}

/// Run a fallible closure, turning both errors and panics into an [`ActionError`].
pub(crate) fn invoke<F>(f: F) -> std::result::Result<(), ActionError>
where
    F: FnOnce() -> std::result::Result<(), BoxError>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ActionError::from(e)),
        Err(payload) => Err(ActionError::from_panic(payload)),
    }
}

/// Tagged result of a work item, resolved exactly once.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success,
    Failure(ActionError),
    /// The item was discarded without running.
    Cancelled,
}

impl Outcome {
    pub fn into_result(self) -> Result<()> {
        match self {
            Outcome::Success => Ok(()),
            Outcome::Failure(e) => Err(ExecutorError::Action(e)),
            Outcome::Cancelled => Err(ExecutorError::Aborted),
        }
    }
}

/// Single-assignment completion signal.
///
/// Dropping an unresolved signal resolves it as [`Outcome::Cancelled`], so
/// a waiter is released on every path, including abrupt executor stops.
#[derive(Debug)]
pub(crate) struct CompletionSignal(Option<oneshot::Sender<Outcome>>);

impl CompletionSignal {
    pub(crate) fn new() -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        (Self(Some(tx)), rx)
    }

    pub(crate) fn resolve(mut self, outcome: Outcome) {
        if let Some(tx) = self.0.take() {
            // The waiter may have given up (cancelled its wait); that is fine.
            let _ = tx.send(outcome);
        }
    }
}

impl Drop for CompletionSignal {
    fn drop(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(Outcome::Cancelled);
        }
    }
}

pub(crate) enum Payload {
    Run(Action),
    /// Zero-effect marker used by flush barriers.
    Flush,
}

/// One queued unit of work.
pub(crate) struct WorkItem {
    pub(crate) payload: Payload,
    pub(crate) completion: Option<CompletionSignal>,
    pub(crate) group: Option<Arc<GroupShared>>,
    pub(crate) enqueued_at: Instant,
}

impl WorkItem {
    pub(crate) fn action(action: Action, group: Option<Arc<GroupShared>>) -> Self {
        Self {
            payload: Payload::Run(action),
            completion: None,
            group,
            enqueued_at: Instant::now(),
        }
    }

    pub(crate) fn flush_marker() -> (Self, oneshot::Receiver<Outcome>) {
        let (signal, rx) = CompletionSignal::new();
        let item = Self {
            payload: Payload::Flush,
            completion: Some(signal),
            group: None,
            enqueued_at: Instant::now(),
        };
        (item, rx)
    }

    pub(crate) fn with_completion(mut self) -> (Self, oneshot::Receiver<Outcome>) {
        let (signal, rx) = CompletionSignal::new();
        self.completion = Some(signal);
        (self, rx)
    }

    /// Stamp the item at the moment it is handed to the queue.
    pub(crate) fn stamp(mut self) -> Self {
        self.enqueued_at = Instant::now();
        self
    }

    pub(crate) fn is_flush(&self) -> bool {
        matches!(self.payload, Payload::Flush)
    }
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("flush", &self.is_flush())
            .field("waited", &self.completion.is_some())
            .field("group", &self.group.as_ref().map(|g| g.id()))
            .field("enqueued_at", &self.enqueued_at)
            .finish()
    }
}
