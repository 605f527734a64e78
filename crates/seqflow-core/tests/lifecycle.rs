mod helpers;

use std::sync::mpsc;
use std::time::Duration;

use helpers::{init_tracing, Running};
use seqflow_core::{BoxError, Executor, ExecutorConfig, ExecutorError, ExecutorState};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const PATIENCE: Duration = Duration::from_secs(5);

#[tokio::test]
async fn second_run_is_rejected_without_disturbing_the_first() {
    let running = Running::start(Executor::new(None, Duration::ZERO));
    assert_eq!(running.executor.state(), ExecutorState::Running);

    match running.executor.run(CancellationToken::new()).await {
        Err(ExecutorError::InvalidState { from, to }) => {
            assert_eq!(from, ExecutorState::Running);
            assert_eq!(to, ExecutorState::Running);
        }
        other => panic!("expected InvalidState, got {other:?}"),
    }

    running
        .executor
        .add_and_wait(|| Ok::<(), BoxError>(()), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(running.executor.state(), ExecutorState::Running);
    running.stop().await;
}

#[tokio::test]
async fn spawn_after_stop_reports_invalid_state() {
    let running = Running::start(Executor::new(None, Duration::ZERO));
    let executor = running.executor.clone();
    running.stop().await;

    let result = executor.spawn(CancellationToken::new()).await.unwrap();
    assert!(matches!(
        result,
        Err(ExecutorError::InvalidState {
            from: ExecutorState::Stopped,
            ..
        })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_passes_through_draining() {
    let running = Running::start(Executor::new(None, Duration::ZERO));
    let executor = running.executor.clone();
    let (started_tx, started_rx) = tokio::sync::oneshot::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    executor
        .add(move || -> Result<(), BoxError> {
            let _ = started_tx.send(());
            release_rx.recv()?;
            Ok(())
        })
        .unwrap();
    executor.add(|| Ok::<(), BoxError>(())).unwrap();
    started_rx.await.unwrap();

    let stopping = tokio::spawn(running.stop());
    timeout(PATIENCE, executor.wait_for_state(ExecutorState::Draining))
        .await
        .expect("executor should start draining");
    assert!(executor.is_closed());
    assert!(matches!(
        executor.add(|| Ok::<(), BoxError>(())),
        Err(ExecutorError::Closed)
    ));

    release_tx.send(()).unwrap();
    timeout(PATIENCE, stopping)
        .await
        .expect("shutdown should finish")
        .unwrap();

    assert_eq!(executor.state(), ExecutorState::Stopped);
    let metrics = executor.metrics();
    assert_eq!(metrics.executed, 2);
    assert_eq!(metrics.cancelled, 0);
    assert_eq!(executor.pending(), 0);
}

#[tokio::test]
async fn run_token_moves_straight_to_stopped() {
    init_tracing();
    let executor = Executor::new(None, Duration::ZERO);
    let token = CancellationToken::new();
    let worker = executor.spawn(token.clone());

    let watcher = {
        let executor = executor.clone();
        tokio::spawn(async move { executor.wait_for_state(ExecutorState::Stopped).await })
    };
    token.cancel();
    worker.await.unwrap().unwrap();
    timeout(PATIENCE, watcher).await.unwrap().unwrap();

    assert!(executor.state().is_terminal());
    assert!(executor.is_closed());
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let running = Running::start(Executor::new(None, Duration::ZERO));
    let executor = running.executor.clone();
    running.stop().await;

    executor.shutdown().await;
    assert_eq!(executor.state(), ExecutorState::Stopped);
}

#[tokio::test]
async fn work_added_before_run_executes_once_started() {
    init_tracing();
    let executor = Executor::new(None, Duration::ZERO);
    let (tx, rx) = tokio::sync::oneshot::channel();
    executor
        .add(move || {
            let _ = tx.send("ran");
            Ok::<(), BoxError>(())
        })
        .unwrap();
    assert_eq!(executor.state(), ExecutorState::Created);

    let running = Running::start(executor);
    assert_eq!(timeout(PATIENCE, rx).await.unwrap().unwrap(), "ran");
    running.stop().await;
}

#[tokio::test]
async fn configured_executor_reports_its_settings() {
    let config = ExecutorConfig::from_json(
        r#"{ "name": "audit", "batch_window": { "secs": 1, "nanos": 0 }, "capacity": 4 }"#,
    )
    .unwrap();
    let executor = Executor::from_config(config.clone()).unwrap();

    assert_eq!(executor.name(), "audit");
    assert_eq!(executor.config(), &config);
    assert_eq!(executor.state(), ExecutorState::Created);

    let rejected = Executor::from_config(ExecutorConfig::new("  "));
    assert!(matches!(rejected, Err(ExecutorError::InvalidConfig(_))));
}

#[tokio::test]
async fn metrics_reflect_completed_work() {
    let running = Running::start(Executor::new(None, Duration::ZERO));
    for i in 0..5 {
        running
            .executor
            .add(move || {
                if i == 3 {
                    Err::<(), BoxError>("three".into())
                } else {
                    Ok(())
                }
            })
            .unwrap();
    }
    running.flush().await;

    let metrics = running.executor.metrics();
    assert_eq!(metrics.enqueued, 5);
    assert_eq!(metrics.executed, 5);
    assert_eq!(metrics.failed, 1);
    assert_eq!(metrics.flushes, 1);
    assert_eq!(metrics.pending(), 0);
    running.stop().await;
}
