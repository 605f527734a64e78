//! Executor lifecycle: `Created -> Running -> Draining -> Stopped`.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::error::{ExecutorError, Result};

/// Lifecycle state of an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorState {
    /// Constructed; accepts work but nothing consumes it yet.
    Created,
    /// The consumer loop is running.
    Running,
    /// Shutdown requested; queued work is still being drained.
    Draining,
    /// The consumer loop has exited.
    Stopped,
}

impl ExecutorState {
    /// Whether the state machine allows moving from `self` to `to`.
    pub fn can_transition_to(self, to: ExecutorState) -> bool {
        use ExecutorState::*;
        matches!(
            (self, to),
            (Created, Running)
                | (Created, Stopped)
                | (Running, Draining)
                | (Running, Stopped)
                | (Draining, Stopped)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ExecutorState::Stopped
    }
}

/// Observable lifecycle cell shared by an executor's handles.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    tx: watch::Sender<ExecutorState>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(ExecutorState::Created);
        Self { tx }
    }

    pub(crate) fn current(&self) -> ExecutorState {
        *self.tx.borrow()
    }

    /// Atomically move to `to`, failing if the current state does not allow it.
    pub(crate) fn transition(&self, to: ExecutorState) -> Result<ExecutorState> {
        let mut outcome = Ok(ExecutorState::Created);
        self.tx.send_modify(|state| {
            let from = *state;
            if from.can_transition_to(to) {
                *state = to;
                outcome = Ok(from);
            } else {
                outcome = Err(ExecutorError::InvalidState { from, to });
            }
        });
        if let Ok(from) = outcome {
            debug!(?from, ?to, "executor state changed");
        }
        outcome
    }

    /// Move to `to` only when currently in `from`. Returns whether it moved.
    pub(crate) fn transition_from(&self, from: ExecutorState, to: ExecutorState) -> bool {
        let moved = self.tx.send_if_modified(|state| {
            if *state == from && from.can_transition_to(to) {
                *state = to;
                true
            } else {
                false
            }
        });
        if moved {
            debug!(?from, ?to, "executor state changed");
        }
        moved
    }

    pub(crate) async fn wait_for(&self, target: ExecutorState) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|state| *state == target).await;
    }
}
