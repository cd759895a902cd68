//! Task Runner
//!
//! Runs a unit of asynchronous work (typically resolution followed by one or
//! more commits) as a cancellable, spawned task. Commits issued by a task go
//! through the kernel's commit lock like any other, so tasks are serialized
//! against all other writers; resolution work runs outside the lock.
//!
//! Cancellation is cooperative: the task's token is threaded into every
//! production step it commits, and [`TaskContext::checkpoint`] lets work bail
//! out between stages.

use crate::commit::{CommitPolicy, Selector};
use crate::error::TaskError;
use crate::handle::KernelHandle;
use crate::transaction::{Anchor, TransactionBuilder};
use crate::types::{NodeView, Payload, Reference};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

/// Unique task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A running task as listed by [`TaskRunner::running`].
#[derive(Debug, Clone)]
pub struct TaskSummary {
    pub id: TaskId,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub cancel_requested: bool,
}

#[derive(Debug)]
struct TaskEntry {
    name: String,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
}

/// Removes the registry entry when the task future completes or unwinds.
struct Registration {
    tasks: Arc<DashMap<TaskId, TaskEntry>>,
    id: TaskId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.tasks.remove(&self.id);
    }
}

/// Spawns and tracks kernel tasks.
#[derive(Clone)]
pub struct TaskRunner {
    kernel: Arc<KernelHandle>,
    tasks: Arc<DashMap<TaskId, TaskEntry>>,
}

impl TaskRunner {
    pub fn new(kernel: Arc<KernelHandle>) -> Self {
        Self {
            kernel,
            tasks: Arc::new(DashMap::new()),
        }
    }

    pub fn kernel(&self) -> &Arc<KernelHandle> {
        &self.kernel
    }

    /// Spawn `work` on the tokio runtime.
    ///
    /// The first failure the work returns is surfaced unchanged through the
    /// handle; nothing is retried.
    pub fn run<T, F, Fut>(&self, name: impl Into<String>, work: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let id = TaskId::new();
        let name = name.into();
        let cancel = CancellationToken::new();
        self.tasks.insert(
            id,
            TaskEntry {
                name: name.clone(),
                started_at: Utc::now(),
                cancel: cancel.clone(),
            },
        );

        let registration = Registration {
            tasks: Arc::clone(&self.tasks),
            id,
        };
        let ctx = TaskContext {
            id,
            kernel: Arc::clone(&self.kernel),
            cancel: cancel.clone(),
        };
        let span = tracing::info_span!("task", %id, %name);
        let join = tokio::spawn(
            async move {
                let _registration = registration;
                debug!("task started");
                let result = work(ctx).await;
                match &result {
                    Ok(_) => debug!("task finished"),
                    Err(e) if e.is_cancellation() => debug!("task cancelled"),
                    Err(e) => warn!(error = %e, "task failed"),
                }
                result
            }
            .instrument(span),
        );

        TaskHandle { id, cancel, join }
    }

    /// [`run`](Self::run) and await the result.
    pub async fn run_and_wait<T, F, Fut>(&self, name: impl Into<String>, work: F) -> Result<T, TaskError>
    where
        T: Send + 'static,
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        self.run(name, work).await
    }

    /// Request cancellation of a running task. Returns false when no such
    /// task is running.
    pub fn cancel(&self, id: TaskId) -> bool {
        match self.tasks.get(&id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Request cancellation of every running task; returns how many were
    /// signalled.
    pub fn cancel_all(&self) -> usize {
        let mut count = 0;
        for entry in self.tasks.iter() {
            entry.cancel.cancel();
            count += 1;
        }
        count
    }

    /// Running tasks, oldest first.
    pub fn running(&self) -> Vec<TaskSummary> {
        let mut summaries: Vec<TaskSummary> = self
            .tasks
            .iter()
            .map(|entry| TaskSummary {
                id: *entry.key(),
                name: entry.name.clone(),
                started_at: entry.started_at,
                cancel_requested: entry.cancel.is_cancelled(),
            })
            .collect();
        summaries.sort_by_key(|s| s.started_at);
        summaries
    }
}

impl fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRunner")
            .field("running", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

/// Handle to a spawned task; await it for the task's result.
pub struct TaskHandle<T> {
    id: TaskId,
    cancel: CancellationToken,
    join: JoinHandle<Result<T, TaskError>>,
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.join).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(e) => Err(join_error(e)),
        })
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

fn join_error(e: JoinError) -> TaskError {
    if e.is_cancelled() {
        return TaskError::Cancelled;
    }
    let panic = e.into_panic();
    TaskError::Panicked(panic_message(panic.as_ref()))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// What a task's work can do with the kernel.
#[derive(Clone)]
pub struct TaskContext {
    id: TaskId,
    kernel: Arc<KernelHandle>,
    cancel: CancellationToken,
}

impl TaskContext {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kernel(&self) -> &Arc<KernelHandle> {
        &self.kernel
    }

    pub fn resolve(&self, reference: Reference) -> Option<NodeView> {
        self.kernel.resolve(reference)
    }

    pub fn begin(&self, anchor: impl Into<Anchor>) -> TransactionBuilder {
        self.kernel.begin(anchor)
    }

    /// Commit with this task's cancellation token. A task cancelled before
    /// the commit starts does not touch the graph.
    pub async fn commit(
        &self,
        tx: TransactionBuilder,
        policy: CommitPolicy,
    ) -> Result<Vec<Selector>, TaskError> {
        self.checkpoint()?;
        Ok(self
            .kernel
            .commit_with_cancel(tx, policy, &self.cancel)
            .await?)
    }

    pub async fn prune_if_empty<F>(&self, reference: Reference, is_empty: F) -> Result<bool, TaskError>
    where
        F: Fn(&Payload) -> bool,
    {
        Ok(self.kernel.prune_if_empty(reference, is_empty).await?)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// `Err(TaskError::Cancelled)` once cancellation was requested.
    pub fn checkpoint(&self) -> Result<(), TaskError> {
        if self.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
