use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::lifecycle::ExecutorState;

/// Boxed error returned by user actions and group hooks.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, ExecutorError>;

/// Errors surfaced to callers of the executor API.
#[derive(Debug, Error, Clone)]
pub enum ExecutorError {
    /// The executor no longer accepts work because shutdown has begun.
    #[error("executor is closed")]
    Closed,
    /// A bounded queue had no room and the caller asked not to wait.
    #[error("executor queue is full")]
    QueueFull,
    /// A lifecycle operation was attempted from the wrong state.
    #[error("invalid executor state transition: {from:?} -> {to:?}")]
    InvalidState {
        from: ExecutorState,
        to: ExecutorState,
    },
    /// The caller's cancellation token fired while it was waiting.
    #[error("operation cancelled")]
    Cancelled,
    /// The item was discarded without running because the executor stopped.
    #[error("work item aborted before it ran")]
    Aborted,
    /// The queued action itself failed.
    #[error("action failed: {0}")]
    Action(#[from] ActionError),
    #[error("invalid executor configuration: {0}")]
    InvalidConfig(String),
}

/// A failure raised by an executed action or group hook.
///
/// The inner error is shared, so the completion signal of the item and the
/// error hook observe the very same error value.
#[derive(Clone)]
pub struct ActionError(Arc<dyn StdError + Send + Sync + 'static>);

impl ActionError {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self(Arc::new(error))
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::new(PanicError::from_payload(payload))
    }

    /// Borrow the underlying error.
    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.0
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }

    /// True when both values carry the same underlying error instance.
    pub fn same_as(&self, other: &ActionError) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_panic(&self) -> bool {
        self.downcast_ref::<PanicError>().is_some()
    }
}

impl From<BoxError> for ActionError {
    fn from(error: BoxError) -> Self {
        Self(Arc::from(error))
    }
}

impl fmt::Debug for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl StdError for ActionError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.0)
    }
}

/// An action or hook panicked instead of returning an error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("panicked: {message}")]
pub struct PanicError {
    pub message: String,
}

impl PanicError {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "<non-string panic payload>".to_string()
        };
        Self { message }
    }
}
