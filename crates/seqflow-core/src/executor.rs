//! The sequential executor.
//!
//! Many producers enqueue work; a single consumer loop (the future returned
//! by [`Executor::run`]) dequeues it in FIFO order and runs one item at a
//! time. A failing item is isolated: its error goes to the item's completion
//! signal and then to the optional error handler, and the loop moves on.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::batch::{hook, BatchTracker, Group};
use crate::config::ExecutorConfig;
use crate::error::{ActionError, BoxError, ExecutorError, Result};
use crate::lifecycle::{ExecutorState, Lifecycle};
use crate::metrics::{Counters, ExecutorMetrics};
use crate::queue::{self, QueueReceiver, QueueSender};
use crate::work_item::{boxed, invoke, Outcome, Payload, WorkItem};

/// Callback receiving every failure caught by the consumer loop.
pub type ErrorHandler = Arc<dyn Fn(&ActionError) + Send + Sync + 'static>;

/// Handle to a sequential executor.
///
/// Handles are cheap to clone and all refer to the same queue and loop.
///
/// # Example
///
/// ```rust
/// use seqflow_core::Executor;
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() -> seqflow_core::Result<()> {
/// let executor = Executor::new(None, Duration::ZERO);
/// let worker = executor.spawn(CancellationToken::new());
///
/// executor.add(|| {
///     println!("runs on the consumer loop");
///     Ok::<(), seqflow_core::BoxError>(())
/// })?;
/// executor.wait_flush(&CancellationToken::new()).await?;
///
/// executor.shutdown().await;
/// worker.await.expect("consumer task panicked")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Executor {
    shared: Arc<ExecutorShared>,
}

pub(crate) struct ExecutorShared {
    id: Uuid,
    config: ExecutorConfig,
    sender: RwLock<Option<QueueSender>>,
    receiver: Mutex<Option<QueueReceiver>>,
    lifecycle: Lifecycle,
    draining: CancellationToken,
    error_handler: Option<ErrorHandler>,
    pub(crate) metrics: Counters,
}

impl Executor {
    /// Create an unbounded executor.
    ///
    /// `batch_window` sets group batching granularity; zero gives every
    /// group member its own begin/end pair.
    pub fn new(error_handler: Option<ErrorHandler>, batch_window: Duration) -> Self {
        let config = ExecutorConfig::default().with_batch_window(batch_window);
        Self::with_parts(config, error_handler)
    }

    /// Create an executor from a validated configuration, without an error handler.
    pub fn from_config(config: ExecutorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_parts(config, None))
    }

    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::new()
    }

    fn with_parts(config: ExecutorConfig, error_handler: Option<ErrorHandler>) -> Self {
        let (tx, rx) = queue::channel(config.capacity);
        Self {
            shared: Arc::new(ExecutorShared {
                id: Uuid::new_v4(),
                config,
                sender: RwLock::new(Some(tx)),
                receiver: Mutex::new(Some(rx)),
                lifecycle: Lifecycle::new(),
                draining: CancellationToken::new(),
                error_handler,
                metrics: Counters::default(),
            }),
        }
    }

    pub(crate) fn shared(&self) -> &ExecutorShared {
        &self.shared
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ExecutorState {
        self.shared.lifecycle.current()
    }

    /// True once new work is refused.
    pub fn is_closed(&self) -> bool {
        self.shared
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Actions accepted but not yet run or discarded.
    pub fn pending(&self) -> u64 {
        self.metrics().pending()
    }

    pub fn metrics(&self) -> ExecutorMetrics {
        self.shared.metrics.snapshot()
    }

    /// Wait until the executor reaches `state`.
    pub async fn wait_for_state(&self, state: ExecutorState) {
        self.shared.lifecycle.wait_for(state).await
    }

    /// Run the consumer loop until the queue is closed and drained or
    /// `token` fires.
    ///
    /// `token` stops the executor; it never interrupts an action that is
    /// already running. Items still queued when it fires are discarded and
    /// their waiters receive [`ExecutorError::Aborted`].
    ///
    /// Fails with [`ExecutorError::InvalidState`] unless the executor is
    /// still in [`ExecutorState::Created`].
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        let consumer = self.start()?;
        self.consume(consumer, token).await;
        Ok(())
    }

    /// Run the consumer loop on a new tokio task.
    ///
    /// The executor is already [`ExecutorState::Running`] when this returns,
    /// so a following [`shutdown`](Self::shutdown) drains instead of
    /// discarding. A failed start is reported through the handle.
    pub fn spawn(&self, token: CancellationToken) -> JoinHandle<Result<()>> {
        let executor = self.clone();
        let started = self.start();
        tokio::spawn(async move {
            executor.consume(started?, token).await;
            Ok(())
        })
    }

    fn start(&self) -> Result<Consumer> {
        let shared = &self.shared;
        shared.lifecycle.transition(ExecutorState::Running)?;
        match shared.take_receiver() {
            Some(rx) => Ok(Consumer {
                rx,
                batches: BatchTracker::new(shared.config.batch_window),
                shared: self.shared.clone(),
            }),
            None => {
                shared
                    .lifecycle
                    .transition_from(ExecutorState::Running, ExecutorState::Stopped);
                Err(ExecutorError::InvalidState {
                    from: ExecutorState::Running,
                    to: ExecutorState::Running,
                })
            }
        }
    }

    #[tracing::instrument(name = "consumer", skip_all, fields(executor = %self.shared.config.name, id = %self.shared.id))]
    async fn consume(&self, mut consumer: Consumer, token: CancellationToken) {
        let shared = &*self.shared;
        debug!("consumer loop started");

        let mut draining = false;
        loop {
            let deadline = consumer.batches.next_deadline();
            let item = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("run token cancelled, stopping consumer loop");
                    break;
                }
                _ = shared.draining.cancelled(), if !draining => {
                    debug!("draining queued work");
                    draining = true;
                    consumer.rx.close();
                    continue;
                }
                item = consumer.rx.recv() => item,
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    consumer.batches.close_expired(Instant::now(), shared);
                    continue;
                }
            };
            match item {
                Some(item) => shared.execute(item, &mut consumer.batches),
                None => break,
            }
        }
        drop(consumer);
        debug!(metrics = ?shared.metrics.snapshot(), "consumer loop stopped");
    }

    /// Queue an action and return immediately.
    ///
    /// Never waits: fails with [`ExecutorError::Closed`] after shutdown began
    /// and with [`ExecutorError::QueueFull`] when a bounded queue has no room.
    pub fn add<F, E>(&self, action: F) -> Result<()>
    where
        F: FnOnce() -> std::result::Result<(), E> + Send + 'static,
        E: Into<BoxError>,
    {
        self.enqueue(WorkItem::action(boxed(action), None))
    }

    /// Queue an action, waiting for room on a bounded queue.
    ///
    /// Returns [`ExecutorError::Cancelled`] if `token` fires before the item
    /// is accepted; the action then never runs.
    pub async fn add_async<F, E>(&self, action: F, token: &CancellationToken) -> Result<()>
    where
        F: FnOnce() -> std::result::Result<(), E> + Send + 'static,
        E: Into<BoxError>,
    {
        self.enqueue_async(WorkItem::action(boxed(action), None), token)
            .await
    }

    /// Queue an action and wait until the consumer loop has run it.
    ///
    /// A failing action yields [`ExecutorError::Action`] carrying the same
    /// error the error handler receives. If `token` fires after the item
    /// was accepted, the caller stops waiting but the action still runs.
    pub async fn add_and_wait<F, E>(&self, action: F, token: &CancellationToken) -> Result<()>
    where
        F: FnOnce() -> std::result::Result<(), E> + Send + 'static,
        E: Into<BoxError>,
    {
        self.enqueue_and_wait(WorkItem::action(boxed(action), None), token)
            .await
    }

    /// Wait until every item enqueued before this call has executed.
    ///
    /// Reaching the flush point also closes any open group batch.
    pub async fn wait_flush(&self, token: &CancellationToken) -> Result<()> {
        let (marker, rx) = WorkItem::flush_marker();
        self.shared.sender()?.push(marker, token).await?;
        await_outcome(rx, token).await
    }

    /// Create a reusable batching group bound to this executor.
    ///
    /// `begin` runs on the consumer loop before the first member of each
    /// batch, `end` after the last. Every `begin` is matched by one `end`.
    pub fn create_group<B, BE, N, NE>(&self, begin: B, end: N) -> Group
    where
        B: Fn() -> std::result::Result<(), BE> + Send + Sync + 'static,
        BE: Into<BoxError>,
        N: Fn() -> std::result::Result<(), NE> + Send + Sync + 'static,
        NE: Into<BoxError>,
    {
        Group::new(self.clone(), hook(begin), hook(end))
    }

    /// Stop accepting work and wait until everything already queued has run.
    ///
    /// Running and queued actions are never cancelled or timed out. If the
    /// loop was never started, queued items are discarded instead. Calling
    /// this from inside an action would wait on itself; don't.
    pub async fn shutdown(&self) {
        let shared = &*self.shared;
        shared.close_sender();

        if shared
            .lifecycle
            .transition_from(ExecutorState::Created, ExecutorState::Stopped)
        {
            if let Some(mut rx) = shared.take_receiver() {
                rx.close();
                while let Some(item) = rx.try_recv() {
                    shared.discard(item);
                }
            }
            return;
        }

        shared
            .lifecycle
            .transition_from(ExecutorState::Running, ExecutorState::Draining);
        shared.draining.cancel();
        shared.lifecycle.wait_for(ExecutorState::Stopped).await;
    }

    pub(crate) fn enqueue(&self, item: WorkItem) -> Result<()> {
        self.shared.sender()?.try_push(item)?;
        self.shared.metrics.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) async fn enqueue_async(&self, item: WorkItem, token: &CancellationToken) -> Result<()> {
        self.shared.sender()?.push(item, token).await?;
        self.shared.metrics.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) async fn enqueue_and_wait(&self, item: WorkItem, token: &CancellationToken) -> Result<()> {
        let (item, rx) = item.with_completion();
        self.enqueue_async(item, token).await?;
        await_outcome(rx, token).await
    }
}

async fn await_outcome(rx: oneshot::Receiver<Outcome>, token: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        outcome = rx => outcome.unwrap_or(Outcome::Cancelled).into_result(),
        _ = token.cancelled() => Err(ExecutorError::Cancelled),
    }
}

impl ExecutorShared {
    fn sender(&self) -> Result<QueueSender> {
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ExecutorError::Closed)
    }

    fn close_sender(&self) {
        let previous = self
            .sender
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if previous.is_some() {
            debug!(executor = %self.config.name, "executor closed to new work");
        }
    }

    fn take_receiver(&self) -> Option<QueueReceiver> {
        self.receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn execute(&self, item: WorkItem, batches: &mut BatchTracker) {
        batches.close_stale(item.enqueued_at, self);
        let WorkItem {
            payload,
            completion,
            group,
            ..
        } = item;

        match payload {
            Payload::Flush => {
                batches.close_all(self);
                self.metrics.flushes.fetch_add(1, Ordering::Relaxed);
                if let Some(completion) = completion {
                    completion.resolve(Outcome::Success);
                }
            }
            Payload::Run(action) => {
                if let Some(group) = &group {
                    batches.enter(group, self);
                }
                let result = invoke(action);
                self.metrics.executed.fetch_add(1, Ordering::Relaxed);
                match result {
                    Ok(()) => {
                        if let Some(completion) = completion {
                            completion.resolve(Outcome::Success);
                        }
                    }
                    Err(e) => {
                        self.metrics.failed.fetch_add(1, Ordering::Relaxed);
                        if let Some(completion) = completion {
                            completion.resolve(Outcome::Failure(e.clone()));
                        }
                        self.report(e, "action");
                    }
                }
                if let Some(group) = &group {
                    batches.leave(group, self);
                }
            }
        }
    }

    /// Drop an item without running it; its waiter sees `Aborted`.
    fn discard(&self, item: WorkItem) {
        if !item.is_flush() {
            self.metrics.cancelled.fetch_add(1, Ordering::Relaxed);
        }
        drop(item);
    }

    /// Deliver a caught failure to the error handler, or log it.
    pub(crate) fn report(&self, error: ActionError, source: &'static str) {
        let Some(handler) = &self.error_handler else {
            warn!(executor = %self.config.name, source, error = %error, "unobserved failure");
            return;
        };
        debug!(executor = %self.config.name, source, error = %error, "failure caught");
        if catch_unwind(AssertUnwindSafe(|| handler(&error))).is_err() {
            error!(executor = %self.config.name, source, "error handler panicked");
        }
    }
}

/// State owned by whichever loop started the executor.
///
/// Dropping it tears the executor down: open batches get their `end`,
/// leftover items are discarded and the lifecycle reaches `Stopped`. This
/// holds whether the loop returned or its future was dropped mid-await.
struct Consumer {
    rx: QueueReceiver,
    batches: BatchTracker,
    shared: Arc<ExecutorShared>,
}

impl Drop for Consumer {
    fn drop(&mut self) {
        let shared = &*self.shared;
        self.batches.close_all(shared);
        shared.close_sender();
        self.rx.close();
        while let Some(item) = self.rx.try_recv() {
            shared.discard(item);
        }
        let lifecycle = &shared.lifecycle;
        if !lifecycle.transition_from(ExecutorState::Draining, ExecutorState::Stopped) {
            lifecycle.transition_from(ExecutorState::Running, ExecutorState::Stopped);
        }
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("id", &self.shared.id)
            .field("name", &self.shared.config.name)
            .field("state", &self.state())
            .field("metrics", &self.metrics())
            .finish()
    }
}

/// Builder for [`Executor`].
#[derive(Default)]
pub struct ExecutorBuilder {
    config: ExecutorConfig,
    error_handler: Option<ErrorHandler>,
}

impl ExecutorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn batch_window(mut self, window: Duration) -> Self {
        self.config.batch_window = window;
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = Some(capacity);
        self
    }

    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ActionError) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Result<Executor> {
        self.config.validate()?;
        Ok(Executor::with_parts(self.config, self.error_handler))
    }
}
