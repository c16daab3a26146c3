use std::collections::HashMap;
use std::mem;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use crate::error::MigrationResult;
use crate::source::base::SequenceStore;
use crate::store::base::DestinationStore;
use crate::workers::base::{Worker, WorkerHandle};
use crate::workers::migration::{MigrationWorker, MigrationWorkerHandle, WorkerProgress};

/// Internal state for [`MigrationWorkerPool`].
#[derive(Debug)]
pub struct MigrationWorkerPoolInner {
    /// Running workers indexed by worker id.
    active: HashMap<String, MigrationWorkerHandle>,
    /// Workers that stopped since the pool was last drained.
    finished: Vec<MigrationWorkerHandle>,
    /// Number of finished workers that stopped with an error.
    failed: usize,
    /// Notified whenever a worker finishes.
    pool_update: Arc<Notify>,
}

impl MigrationWorkerPoolInner {
    fn new() -> Self {
        Self {
            active: HashMap::new(),
            finished: Vec::new(),
            failed: 0,
            pool_update: Arc::new(Notify::new()),
        }
    }

    /// Starts a worker and tracks it as active.
    ///
    /// Returns `Ok(false)` without starting anything if a worker with the same id
    /// is already running.
    pub async fn start_worker<S, D>(&mut self, worker: MigrationWorker<S, D>) -> MigrationResult<bool>
    where
        S: SequenceStore + Clone + Send + Sync + 'static,
        D: DestinationStore + Clone + Send + Sync + 'static,
    {
        let worker_id = worker.worker_id().to_string();
        if self.active.contains_key(&worker_id) {
            warn!(worker_id = %worker_id, "worker already exists in the pool");
            return Ok(false);
        }

        let handle = worker.start().await?;
        self.active.insert(worker_id.clone(), handle);

        debug!(worker_id = %worker_id, "added worker to the pool");

        Ok(true)
    }

    /// Moves a worker from active to finished and wakes up whoever waits on the pool.
    pub fn mark_worker_finished(&mut self, worker_id: &str, failed: bool) {
        let removed_worker = self.active.remove(worker_id);

        if failed {
            self.failed += 1;
        }

        self.pool_update.notify_waiters();

        if let Some(removed_worker) = removed_worker {
            self.finished.push(removed_worker);
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Returns `true` if a worker stopped with an error since the pool was last drained.
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    pub fn pool_update(&self) -> Arc<Notify> {
        self.pool_update.clone()
    }

    /// Progress of every worker since the pool was last drained, active ones included.
    pub fn worker_progress(&self) -> Vec<WorkerProgress> {
        self.active
            .values()
            .chain(self.finished.iter())
            .map(|handle| handle.state())
            .collect()
    }

    /// Drains the finished workers once none is active.
    ///
    /// Returns `Ok(Some(notify))` while workers are still active. Waiting on them
    /// here would deadlock, since a worker locks the pool to mark itself finished.
    /// Otherwise returns `Ok(None)`, or the errors of the failed workers.
    pub async fn wait_all(&mut self) -> MigrationResult<Option<Arc<Notify>>> {
        if !self.active.is_empty() {
            return Ok(Some(self.pool_update.clone()));
        }

        self.failed = 0;

        let mut errors = Vec::new();
        for worker in mem::take(&mut self.finished) {
            if let Err(err) = worker.wait().await {
                errors.push(err);
            }
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        Ok(None)
    }
}

/// Pool of the migration workers of a round.
///
/// The pool is reused by every round of a migration. A round starts its workers,
/// then waits for all of them before the next round starts.
#[derive(Debug, Clone)]
pub struct MigrationWorkerPool {
    inner: Arc<Mutex<MigrationWorkerPoolInner>>,
}

impl MigrationWorkerPool {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MigrationWorkerPoolInner::new())),
        }
    }

    /// Waits for all active workers to complete, returning the errors of the failed ones.
    pub async fn wait_all(&self) -> MigrationResult<()> {
        loop {
            let mut workers = self.inner.lock().await;
            let Some(notify) = workers.wait_all().await? else {
                return Ok(());
            };

            // Registered before the lock is released so no finished worker is missed.
            let notified = notify.notified();
            drop(workers);

            notified.await;
        }
    }
}

impl Default for MigrationWorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for MigrationWorkerPool {
    type Target = Mutex<MigrationWorkerPoolInner>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
