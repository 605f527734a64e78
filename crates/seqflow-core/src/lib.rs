//! Core of seqflow: a single-consumer, multi-producer sequential executor.
//!
//! Work added from any number of tasks runs one item at a time in the order
//! it was enqueued. Failures are isolated per item, groups bracket runs of
//! related work with `begin`/`end` hooks, and flush barriers let callers
//! wait for everything queued before them.

pub mod batch;
pub mod config;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod metrics;
mod queue;
pub mod work_item;

pub use batch::{BatchState, Group, Hook};
pub use config::ExecutorConfig;
pub use error::{ActionError, BoxError, ExecutorError, PanicError, Result};
pub use executor::{ErrorHandler, Executor, ExecutorBuilder};
pub use lifecycle::ExecutorState;
pub use metrics::ExecutorMetrics;
pub use work_item::{Action, Outcome};
