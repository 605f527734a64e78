//! # seqflow - sequential task execution for Rust
//!
//! `seqflow` serializes work submitted from many producers onto a single
//! consumer loop. Items run one at a time in submission order, a failing
//! item never blocks the ones after it, and related work can be grouped
//! into batches bracketed by `begin`/`end` hooks.
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! seqflow = "0.3"
//! ```
//!
//! ```rust
//! use seqflow::core::Executor;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> seqflow::core::Result<()> {
//! let executor = Executor::builder()
//!     .name("ledger")
//!     .error_handler(|e| eprintln!("ledger update failed: {e}"))
//!     .build()?;
//! let worker = executor.spawn(CancellationToken::new());
//!
//! for i in 0..3 {
//!     executor.add(move || {
//!         println!("applying update {i}");
//!         Ok::<(), seqflow::core::BoxError>(())
//!     })?;
//! }
//!
//! executor.shutdown().await;
//! worker.await.expect("consumer task panicked")?;
//! # Ok(())
//! # }
//! ```

/// Initialize the library with default settings.
///
/// This installs a `tracing` subscriber so the executor's lifecycle and
/// failure logs are printed.
pub fn init() {
    tracing_subscriber::fmt::init();
}

// Re-export the core crate
pub use seqflow_core as core;

pub use seqflow_core::{Executor, ExecutorConfig, ExecutorError, Group};
