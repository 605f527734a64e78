//! Groups: batching correlators that wrap runs of related work with
//! `begin` / `end` hooks.
//!
//! A group holds no queue state of its own. Its member actions are ordinary
//! work items tagged with the group; the consumer loop drives each group
//! through a two-state machine (`Idle` / `Open`) based on the gaps it
//! observes between members versus the executor's batch window.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::error::{BoxError, Result};
use crate::executor::{Executor, ExecutorShared};
use crate::work_item::{boxed, invoke, WorkItem};

/// A reusable, fallible `begin` or `end` hook.
pub type Hook = Arc<dyn Fn() -> std::result::Result<(), BoxError> + Send + Sync + 'static>;

pub(crate) fn hook<F, E>(f: F) -> Hook
where
    F: Fn() -> std::result::Result<(), E> + Send + Sync + 'static,
    E: Into<BoxError>,
{
    Arc::new(move || f().map_err(Into::into))
}

/// Batch state of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    /// A batch is open; `last_activity` is when its latest member finished.
    Open { last_activity: Instant },
}

pub(crate) struct GroupShared {
    id: Uuid,
    begin: Hook,
    end: Hook,
    state: Mutex<BatchState>,
}

impl GroupShared {
    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn state(&self) -> BatchState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: BatchState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// When an open batch expires. `None` while idle, or when the window
    /// reaches past what an `Instant` can represent; such a batch closes
    /// only on flush or loop exit.
    fn deadline(&self, window: Duration) -> Option<Instant> {
        match self.state() {
            BatchState::Idle => None,
            BatchState::Open { last_activity } => last_activity.checked_add(window),
        }
    }
}

/// Handle used to add work that belongs to one logical batch stream.
///
/// Cloning a group yields another handle to the same batch state.
#[derive(Clone)]
pub struct Group {
    executor: Executor,
    shared: Arc<GroupShared>,
}

impl Group {
    pub(crate) fn new(executor: Executor, begin: Hook, end: Hook) -> Self {
        Self {
            executor,
            shared: Arc::new(GroupShared {
                id: Uuid::new_v4(),
                begin,
                end,
                state: Mutex::new(BatchState::Idle),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// The executor this group posts to.
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn state(&self) -> BatchState {
        self.shared.state()
    }

    pub fn is_batch_open(&self) -> bool {
        matches!(self.shared.state(), BatchState::Open { .. })
    }

    /// Queue a member action without waiting for it.
    pub fn add<F, E>(&self, action: F) -> Result<()>
    where
        F: FnOnce() -> std::result::Result<(), E> + Send + 'static,
        E: Into<BoxError>,
    {
        self.executor.enqueue(self.member(action))
    }

    /// Queue a member action, waiting for queue room while observing `token`.
    pub async fn add_async<F, E>(&self, action: F, token: &CancellationToken) -> Result<()>
    where
        F: FnOnce() -> std::result::Result<(), E> + Send + 'static,
        E: Into<BoxError>,
    {
        self.executor.enqueue_async(self.member(action), token).await
    }

    /// Queue a member action and wait until it has run.
    pub async fn add_and_wait<F, E>(&self, action: F, token: &CancellationToken) -> Result<()>
    where
        F: FnOnce() -> std::result::Result<(), E> + Send + 'static,
        E: Into<BoxError>,
    {
        self.executor
            .enqueue_and_wait(self.member(action), token)
            .await
    }

    fn member<F, E>(&self, action: F) -> WorkItem
    where
        F: FnOnce() -> std::result::Result<(), E> + Send + 'static,
        E: Into<BoxError>,
    {
        WorkItem::action(boxed(action), Some(self.shared.clone()))
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("id", &self.shared.id)
            .field("state", &self.shared.state())
            .field("executor", &self.executor.id())
            .finish()
    }
}

/// Consumer-side bookkeeping of open batches, in the order they opened.
pub(crate) struct BatchTracker {
    window: Duration,
    open: Vec<Arc<GroupShared>>,
}

impl BatchTracker {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            open: Vec::new(),
        }
    }

    /// Earliest instant at which an idle consumer should close a batch.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.open
            .iter()
            .filter_map(|group| group.deadline(self.window))
            .min()
    }

    /// Close every batch whose window ended before `at`.
    pub(crate) fn close_stale(&mut self, at: Instant, executor: &ExecutorShared) {
        self.close_where(executor, |deadline| deadline < at);
    }

    /// Close every batch whose window has elapsed by `now`.
    pub(crate) fn close_expired(&mut self, now: Instant, executor: &ExecutorShared) {
        self.close_where(executor, |deadline| deadline <= now);
    }

    pub(crate) fn close_all(&mut self, executor: &ExecutorShared) {
        for group in std::mem::take(&mut self.open) {
            self.run_end(&group, executor);
        }
    }

    /// Open a batch for `group` unless one is already open.
    pub(crate) fn enter(&mut self, group: &Arc<GroupShared>, executor: &ExecutorShared) {
        if matches!(group.state(), BatchState::Open { .. }) {
            return;
        }
        group.set_state(BatchState::Open {
            last_activity: Instant::now(),
        });
        self.open.push(group.clone());
        executor.metrics.batches_opened.fetch_add(1, Ordering::Relaxed);
        debug!(group = %group.id, "batch opened");
        if let Err(e) = invoke(|| (group.begin)()) {
            executor.report(e, "begin hook");
        }
    }

    /// Record that a member of `group` finished.
    pub(crate) fn leave(&mut self, group: &Arc<GroupShared>, executor: &ExecutorShared) {
        if self.window.is_zero() {
            if let Some(pos) = self.open.iter().position(|g| g.id == group.id) {
                let group = self.open.remove(pos);
                self.run_end(&group, executor);
            }
        } else if matches!(group.state(), BatchState::Open { .. }) {
            group.set_state(BatchState::Open {
                last_activity: Instant::now(),
            });
        }
    }

    fn close_where(&mut self, executor: &ExecutorShared, expired: impl Fn(Instant) -> bool) {
        let window = self.window;
        let (closing, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut self.open)
            .into_iter()
            .partition(|group| group.deadline(window).is_some_and(&expired));
        self.open = keep;
        for group in closing {
            self.run_end(&group, executor);
        }
    }

    fn run_end(&self, group: &GroupShared, executor: &ExecutorShared) {
        group.set_state(BatchState::Idle);
        executor.metrics.batches_closed.fetch_add(1, Ordering::Relaxed);
        debug!(group = %group.id, "batch closed");
        if let Err(e) = invoke(|| (group.end)()) {
            executor.report(e, "end hook");
        }
    }
}
