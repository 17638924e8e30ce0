//! Bounded task pool for work taken off the caller's path.
//!
//! The pool is an owned value: the service creates one at startup, hands
//! references to whoever submits work, and calls [`TaskPool::shutdown`] at
//! teardown. Concurrency is bounded by a semaphore; tasks beyond the bound
//! wait for a free slot.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::PoolConfig;
use crate::{CairnError, Result};

/// Number of workers used when none is configured.
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// A bounded pool of asynchronous workers.
pub struct TaskPool {
    semaphore: Arc<Semaphore>,
    size: usize,
    shutdown: AtomicBool,
    pending: Arc<Pending>,
}

/// Count of submitted tasks that have not finished.
#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

/// Marks one task as pending until dropped, even on panic or abort.
struct PendingGuard(Arc<Pending>);

impl PendingGuard {
    fn new(pending: Arc<Pending>) -> Self {
        pending.count.fetch_add(1, Ordering::SeqCst);
        Self(pending)
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl TaskPool {
    /// Create a pool running at most `size` tasks at once.
    ///
    /// A size of 0 means one worker per available CPU.
    pub fn new(size: usize) -> Self {
        let size = if size == 0 { default_pool_size() } else { size };
        debug!("Creating task pool with {} workers", size);

        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
            shutdown: AtomicBool::new(false),
            pending: Arc::new(Pending::default()),
        }
    }

    /// Create a pool from configuration.
    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.size)
    }

    /// Maximum number of tasks running at once.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of tasks currently holding a worker slot.
    pub fn active_tasks(&self) -> usize {
        self.size.saturating_sub(self.semaphore.available_permits())
    }

    /// Number of submitted tasks that have not finished, running or queued.
    pub fn pending_tasks(&self) -> usize {
        self.pending.count.load(Ordering::SeqCst)
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Submit a task.
    ///
    /// Returns immediately with a handle. Awaiting the handle yields the
    /// task's result; dropping it detaches the task. A failed task is
    /// logged either way.
    pub fn submit<F, T>(&self, name: impl Into<String>, task: F) -> Result<TaskHandle<T>>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        // Counted before the flag check so shutdown cannot close the
        // semaphore between the check and the spawn
        let guard = PendingGuard::new(self.pending.clone());
        if self.is_shutdown() {
            drop(guard);
            return Err(CairnError::PoolShutdown);
        }

        let name = name.into();
        let task_name = name.clone();
        let semaphore = self.semaphore.clone();

        let inner = tokio::spawn(async move {
            let _guard = guard;
            // Closed only once every pending task has finished
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| CairnError::PoolShutdown)?;

            debug!("Running task {}", task_name);
            let result = task.await;
            if let Err(ref e) = result {
                error!("Task {} failed: {}", task_name, e);
            }
            result
        });

        Ok(TaskHandle { name, inner })
    }

    /// Stop accepting work and wait for submitted tasks to finish.
    ///
    /// Tasks already waiting for a slot still run. Calling this twice is
    /// harmless.
    pub async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(
            "Shutting down task pool ({} pending task(s))",
            self.pending_tasks()
        );
        loop {
            let idle = self.pending.idle.notified();
            tokio::pin!(idle);
            // Register before checking so a final notification is not missed
            idle.as_mut().enable();
            if self.pending_tasks() == 0 {
                break;
            }
            idle.await;
        }
        self.semaphore.close();
        info!("Task pool shut down");
    }
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("size", &self.size)
            .field("pending", &self.pending_tasks())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Handle to a task submitted to a [`TaskPool`].
#[derive(Debug)]
pub struct TaskHandle<T> {
    name: String,
    inner: JoinHandle<Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Name given at submission.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the task has completed.
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Wait for the task and return its result.
    ///
    /// A task that panicked or was aborted yields [`CairnError::TaskFailed`].
    pub async fn join(self) -> Result<T> {
        match self.inner.await {
            Ok(result) => result,
            Err(e) => Err(CairnError::TaskFailed(format!("{}: {}", self.name, e))),
        }
    }
}
