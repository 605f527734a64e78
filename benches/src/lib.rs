//! Shared workloads for the seqflow benchmarks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use seqflow_core::{BoxError, Executor};
use tokio_util::sync::CancellationToken;

/// Start `executor`, push `actions` trivial actions through it and wait
/// until all of them ran. Grouped runs post every action through one group.
pub async fn drain(executor: Executor, actions: u64, grouped: bool) {
    let worker = executor.spawn(CancellationToken::new());
    let counter = Arc::new(AtomicU64::new(0));
    let group = executor.create_group(|| Ok::<(), BoxError>(()), || Ok::<(), BoxError>(()));

    for _ in 0..actions {
        let counter = counter.clone();
        let action = move || {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok::<(), BoxError>(())
        };
        if grouped {
            group.add(action).unwrap();
        } else {
            executor.add(action).unwrap();
        }
    }
    executor.wait_flush(&CancellationToken::new()).await.unwrap();
    executor.shutdown().await;
    worker.await.unwrap().unwrap();
    assert_eq!(counter.load(Ordering::Relaxed), actions);
}
