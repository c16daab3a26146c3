use futures::{FutureExt, TryStreamExt};
use migration_config::shared::MigrationConfig;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, warn};

use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx};
use crate::error::{ErrorKind, MigrationError, MigrationResult};
use crate::migration_error;
use crate::retry::{Backoff, RetryPolicy};
use crate::source::base::SequenceStore;
use crate::store::base::DestinationStore;
use crate::types::{EnumerationRequest, SequenceNumber, SequenceRange, WorkerStatus};
use crate::workers::base::{Worker, WorkerHandle};
use crate::workers::pool::MigrationWorkerPool;

/// The round a worker belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundKind {
    /// Initial bulk copy of the live records.
    Copy,
    /// Replays the source changes made since the previous round.
    CatchUp { round: u32 },
    /// Final pass while the source rejects writes.
    Downtime,
}

impl RoundKind {
    /// Tombstones only matter once the destination holds a copy they can delete from.
    pub fn include_deletes(&self) -> bool {
        !matches!(self, RoundKind::Copy)
    }

    pub fn worker_id(&self, index: usize) -> String {
        match self {
            RoundKind::Copy => format!("copy-{index}"),
            RoundKind::CatchUp { round } => format!("catch-up-{round}-{index}"),
            RoundKind::Downtime => format!("downtime-{index}"),
        }
    }

    /// Retry policy of the round: downtime bounds every retry since writes are rejected meanwhile.
    pub fn retry_policy(&self, config: &MigrationConfig) -> RetryPolicy {
        match self {
            RoundKind::Copy | RoundKind::CatchUp { .. } => {
                RetryPolicy::unbounded(&config.copy_retry)
            }
            RoundKind::Downtime => RetryPolicy::bounded(&config.downtime_retry),
        }
    }
}

impl fmt::Display for RoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundKind::Copy => write!(f, "copy"),
            RoundKind::CatchUp { round } => write!(f, "catch-up {round}"),
            RoundKind::Downtime => write!(f, "downtime"),
        }
    }
}

#[derive(Debug)]
struct WorkerProgressInner {
    worker_id: String,
    range: SequenceRange,
    first_applied: AtomicI64,
    last_applied: AtomicI64,
}

/// Progress of a worker over its range.
///
/// Only the worker advances it, everyone else reads it without locking.
#[derive(Debug, Clone)]
pub struct WorkerProgress {
    inner: Arc<WorkerProgressInner>,
}

impl WorkerProgress {
    pub fn new(worker_id: String, range: SequenceRange) -> Self {
        Self::from_status(&WorkerStatus::new(worker_id, range))
    }

    /// Restores the progress of a worker from its persisted status.
    pub fn from_status(status: &WorkerStatus) -> Self {
        let inner = WorkerProgressInner {
            worker_id: status.worker_id.clone(),
            range: status.range(),
            first_applied: AtomicI64::new(status.first_applied_seq_num),
            last_applied: AtomicI64::new(status.last_applied_seq_num),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.inner.worker_id
    }

    pub fn range(&self) -> SequenceRange {
        self.inner.range
    }

    /// Records that every sequence number of the range up to `covered_through` is applied.
    pub fn advance(&self, covered_through: SequenceNumber) {
        let range = self.inner.range;
        let _ = self.inner.first_applied.compare_exchange(
            range.start - 1,
            range.start,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.inner
            .last_applied
            .fetch_max(covered_through.min(range.end), Ordering::AcqRel);
    }

    pub fn last_applied(&self) -> SequenceNumber {
        self.inner.last_applied.load(Ordering::Acquire)
    }

    /// First sequence number the next enumeration of this worker starts at.
    pub fn next_sequence_number(&self) -> SequenceNumber {
        self.last_applied() + 1
    }

    pub fn is_complete(&self) -> bool {
        self.last_applied() >= self.inner.range.end
    }

    pub fn snapshot(&self) -> WorkerStatus {
        let range = self.inner.range;
        WorkerStatus {
            worker_id: self.inner.worker_id.clone(),
            start_sequence_number: range.start,
            end_sequence_number: range.end,
            first_applied_seq_num: self.inner.first_applied.load(Ordering::Acquire),
            last_applied_seq_num: self.last_applied(),
        }
    }
}

#[derive(Debug)]
pub struct MigrationWorkerHandle {
    progress: WorkerProgress,
    handle: Option<JoinHandle<MigrationResult<()>>>,
}

impl WorkerHandle<WorkerProgress> for MigrationWorkerHandle {
    fn state(&self) -> WorkerProgress {
        self.progress.clone()
    }

    async fn wait(mut self) -> MigrationResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        handle.await.map_err(|err| {
            migration_error!(
                ErrorKind::WorkerPanic,
                "Migration worker task failed",
                err
            )
        })?
    }
}

/// Worker copying one range of the source into the destination.
#[derive(Debug)]
pub struct MigrationWorker<S, D> {
    progress: WorkerProgress,
    kind: RoundKind,
    config: Arc<MigrationConfig>,
    pool: MigrationWorkerPool,
    source: S,
    destination: D,
    shutdown_rx: ShutdownRx,
}

impl<S, D> MigrationWorker<S, D> {
    pub fn new(
        progress: WorkerProgress,
        kind: RoundKind,
        config: Arc<MigrationConfig>,
        pool: MigrationWorkerPool,
        source: S,
        destination: D,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            progress,
            kind,
            config,
            pool,
            source,
            destination,
            shutdown_rx,
        }
    }

    pub fn worker_id(&self) -> &str {
        self.progress.worker_id()
    }
}

impl<S, D> MigrationWorker<S, D>
where
    S: SequenceStore + Send + Sync,
    D: DestinationStore + Send + Sync,
{
    async fn run(mut self) -> MigrationResult<()> {
        let mut backoff = self.kind.retry_policy(&self.config).backoff();

        while !self.progress.is_complete() {
            match self.enumerate_and_apply(&mut backoff).await {
                Ok(ShutdownResult::Ok(())) => {}
                Ok(ShutdownResult::Shutdown(())) => {
                    info!(
                        last_applied = self.progress.last_applied(),
                        "shutting down migration worker"
                    );

                    return Ok(());
                }
                Err(err) => {
                    let Some(delay) = backoff.next_delay(&err) else {
                        return Err(err);
                    };

                    warn!(
                        attempt = backoff.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "enumeration failed, retrying"
                    );

                    tokio::select! {
                        biased;

                        _ = self.shutdown_rx.changed() => {
                            info!("shutting down migration worker while waiting to retry");

                            return Ok(());
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!(range = %self.progress.range(), "migration worker completed its range");

        Ok(())
    }

    /// Runs one enumeration from the current watermark and applies its pages.
    ///
    /// Shutdown is only observed while waiting on the source. A page that was
    /// received is always applied, atomically, before the watermark moves.
    async fn enumerate_and_apply(
        &mut self,
        backoff: &mut Backoff,
    ) -> MigrationResult<ShutdownResult<(), ()>> {
        let range = self.progress.range();
        let request = EnumerationRequest::new(
            self.progress.next_sequence_number(),
            range.end,
            self.config.chunk_size,
            self.config.chunks_per_enumeration(),
            self.kind.include_deletes(),
        );

        let mut pages = tokio::select! {
            biased;

            _ = self.shutdown_rx.changed() => return Ok(ShutdownResult::Shutdown(())),
            pages = self.source.enumerate(request) => pages?,
        };

        loop {
            let page = tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => return Ok(ShutdownResult::Shutdown(())),
                page = pages.try_next() => page?,
            };
            let Some(page) = page else {
                return Ok(ShutdownResult::Ok(()));
            };

            page.verify_integrity()?;

            let end_reached = page.end_sequence_number_reached;
            let covered_through = match (end_reached, page.last_version()) {
                (true, _) => range.end,
                (false, Some(version)) => version,
                (false, None) => continue,
            };

            let record_count = page.key_value_pairs.len();
            if record_count > 0 {
                self.destination.apply_records(page.key_value_pairs).await?;
            }

            self.progress.advance(covered_through);
            backoff.reset();

            debug!(
                records = record_count,
                last_applied = self.progress.last_applied(),
                "applied enumeration page"
            );

            if end_reached {
                return Ok(ShutdownResult::Ok(()));
            }
        }
    }
}

fn panic_to_error(panic: Box<dyn Any + Send>) -> MigrationError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());

    migration_error!(ErrorKind::WorkerPanic, "Migration worker panicked", message)
}

impl<S, D> Worker<MigrationWorkerHandle, WorkerProgress> for MigrationWorker<S, D>
where
    S: SequenceStore + Clone + Send + Sync + 'static,
    D: DestinationStore + Clone + Send + Sync + 'static,
{
    type Error = MigrationError;

    async fn start(self) -> MigrationResult<MigrationWorkerHandle> {
        let worker_id = self.worker_id().to_string();
        let progress = self.progress.clone();
        let pool = self.pool.clone();

        info!(
            worker_id = %worker_id,
            round = %self.kind,
            range = %progress.range(),
            last_applied = progress.last_applied(),
            "starting migration worker"
        );

        let migration_worker_span = tracing::info_span!(
            "migration_worker",
            worker_id = %worker_id,
            round = %self.kind
        );
        let migration_worker = async move {
            let result = AssertUnwindSafe(self.run())
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(panic_to_error(panic)));

            if let Err(err) = &result {
                error!(error = %err, "migration worker failed");
            }

            pool.lock()
                .await
                .mark_worker_finished(&worker_id, result.is_err());

            result
        }
        .instrument(migration_worker_span);

        let handle = tokio::spawn(migration_worker);

        Ok(MigrationWorkerHandle {
            progress,
            handle: Some(handle),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_starts_before_the_range_and_never_regresses() {
        let progress = WorkerProgress::new("copy-0".to_string(), SequenceRange::new(10, 19));
        let initial = progress.snapshot();
        assert_eq!(initial.first_applied_seq_num, 9);
        assert_eq!(initial.last_applied_seq_num, 9);
        assert_eq!(progress.next_sequence_number(), 10);

        progress.advance(14);
        progress.advance(12);
        let status = progress.snapshot();
        assert_eq!(status.first_applied_seq_num, 10);
        assert_eq!(status.last_applied_seq_num, 14);
        assert!(!progress.is_complete());

        progress.advance(25);
        assert_eq!(progress.last_applied(), 19);
        assert!(progress.is_complete());
    }

    #[test]
    fn progress_is_restored_from_status() {
        let mut status = WorkerStatus::new("copy-1".to_string(), SequenceRange::new(0, 99));
        status.first_applied_seq_num = 0;
        status.last_applied_seq_num = 41;

        let progress = WorkerProgress::from_status(&status);
        assert_eq!(progress.next_sequence_number(), 42);
        assert_eq!(progress.snapshot(), status);
    }

    #[test]
    fn only_the_copy_round_skips_tombstones() {
        assert!(!RoundKind::Copy.include_deletes());
        assert!(RoundKind::CatchUp { round: 1 }.include_deletes());
        assert!(RoundKind::Downtime.include_deletes());

        assert_eq!(RoundKind::CatchUp { round: 2 }.worker_id(3), "catch-up-2-3");
    }
}
