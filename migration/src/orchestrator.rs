//! Phase state machine migrating the actor state of one partition.
//!
//! A migration goes through `Provisioning → Copying → CatchingUp → Downtime →
//! Verifying → Completed`. Every transition is persisted through the
//! [`StatusStore`] before the next phase starts, so a restarted orchestrator
//! resumes from the last durable phase and the worker watermarks saved with it.

use chrono::Utc;
use migration_config::shared::MigrationConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, error, info, warn};

use crate::bail;
use crate::concurrency::shutdown::{
    ShutdownResult, ShutdownRx, ShutdownTx, create_shutdown_channel,
};
use crate::error::{ErrorKind, MigrationError, MigrationResult};
use crate::migration_error;
use crate::retry::{RetryPolicy, retry, retry_until_shutdown};
use crate::source::base::SequenceStore;
use crate::store::base::{DestinationStore, StatusStore};
use crate::types::{
    MigrationPhase, MigrationStatus, PartitionId, SequenceNumber, SequenceRange, WorkerStatus,
    contiguous_watermark,
};
use crate::verification;
use crate::workers::migration::{MigrationWorker, RoundKind, WorkerProgress};
use crate::workers::partition::partition_sequence_range;
use crate::workers::pool::MigrationWorkerPool;

/// Returns `true` once the source is close enough to the destination to stop
/// writes for the final pass.
pub fn should_enter_downtime(
    kvs_lsn: SequenceNumber,
    applied_sequence_number: SequenceNumber,
    downtime_threshold: i64,
) -> bool {
    kvs_lsn.saturating_sub(applied_sequence_number) <= downtime_threshold
}

fn plan_round(kind: RoundKind, ranges: Vec<SequenceRange>) -> Vec<WorkerStatus> {
    ranges
        .into_iter()
        .enumerate()
        .map(|(index, range)| WorkerStatus::new(kind.worker_id(index), range))
        .collect()
}

/// Drives the migration of a partition from a [`SequenceStore`] into a destination store.
#[derive(Debug)]
pub struct MigrationOrchestrator<S, D> {
    partition_id: PartitionId,
    config: Arc<MigrationConfig>,
    source: S,
    store: D,
    pool: MigrationWorkerPool,
    status: MigrationStatus,
    shutdown_tx: ShutdownTx,
    shutdown_rx: ShutdownRx,
}

impl<S, D> MigrationOrchestrator<S, D>
where
    S: SequenceStore + Clone + Send + Sync + 'static,
    D: DestinationStore + StatusStore + Clone + Send + Sync + 'static,
{
    pub fn new(
        partition_id: PartitionId,
        config: MigrationConfig,
        source: S,
        store: D,
    ) -> MigrationResult<Self> {
        config.validate()?;

        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

        Ok(Self {
            partition_id,
            config: Arc::new(config),
            source,
            store,
            pool: MigrationWorkerPool::new(),
            status: MigrationStatus::new(partition_id, Utc::now()),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Returns a handle to stop the migration.
    ///
    /// On shutdown, workers finish the chunk they are applying, progress is
    /// checkpointed and [`MigrationOrchestrator::run`] returns without changing
    /// the phase.
    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Runs the migration until it reaches a terminal phase, fails or is shut down.
    ///
    /// Returns the last persisted status. On failure the source accepts writes
    /// again if they were rejected, and the phase moves to
    /// [`MigrationPhase::Aborted`] on data loss or to [`MigrationPhase::RolledBack`]
    /// when the failure happened after writes were rejected.
    pub async fn run(self) -> MigrationResult<MigrationStatus> {
        let orchestrator_span =
            tracing::info_span!("migration_orchestrator", partition_id = %self.partition_id);

        self.run_phases().instrument(orchestrator_span).await
    }

    async fn run_phases(mut self) -> MigrationResult<MigrationStatus> {
        self.status = self.load_status().await?;

        loop {
            let phase = self.status.current_migration_phase;
            let result = match phase {
                MigrationPhase::Provisioning => self.provision().await,
                MigrationPhase::Copying => self.copy().await,
                MigrationPhase::CatchingUp => self.catch_up().await,
                MigrationPhase::Downtime => self.downtime().await,
                MigrationPhase::Verifying => self.verify().await,
                MigrationPhase::Completed
                | MigrationPhase::Aborted
                | MigrationPhase::RolledBack => {
                    info!(%phase, "migration is finished");

                    return Ok(self.status);
                }
            };

            match result {
                Ok(ShutdownResult::Ok(())) => {}
                Ok(ShutdownResult::Shutdown(())) => {
                    info!(
                        %phase,
                        applied_sequence_number = self.status.applied_sequence_number,
                        "migration stopped on shutdown"
                    );

                    return Ok(self.status);
                }
                Err(err) => return Err(self.handle_failure(err).await),
            }
        }
    }

    async fn load_status(&self) -> MigrationResult<MigrationStatus> {
        let policy = RetryPolicy::bounded(&self.config.copy_retry);
        let store = &self.store;

        let status = retry(&policy, "get_migration_status", || store.get_migration_status()).await?;
        if let Some(status) = status {
            info!(
                phase = %status.current_migration_phase,
                applied_sequence_number = status.applied_sequence_number,
                "resuming migration"
            );

            return Ok(status);
        }

        let status = MigrationStatus::new(self.partition_id, Utc::now());
        retry(&policy, "store_migration_status", || {
            store.store_migration_status(status.clone())
        })
        .await?;

        info!("starting new migration");

        Ok(status)
    }

    async fn persist(&self) -> MigrationResult<()> {
        self.store_status(&self.status).await
    }

    async fn store_status(&self, status: &MigrationStatus) -> MigrationResult<()> {
        let policy = RetryPolicy::bounded(&self.config.copy_retry);

        retry(&policy, "store_migration_status", || {
            self.store.store_migration_status(status.clone())
        })
        .await
    }

    /// Moves to the phase `to` once it is durable. The in-memory phase is left
    /// unchanged when persisting fails.
    async fn transition(&mut self, to: MigrationPhase) -> MigrationResult<()> {
        let from = self.status.current_migration_phase;
        let mut next = self.status.clone();
        next.set_phase(to, Utc::now());

        self.store_status(&next).await?;
        self.status = next;

        info!(%from, %to, "migration phase transition");

        Ok(())
    }

    async fn provision(&mut self) -> MigrationResult<ShutdownResult<(), ()>> {
        let policy = RetryPolicy::unbounded(&self.config.copy_retry);
        let source = &self.source;

        let ShutdownResult::Ok(first) = retry_until_shutdown(
            &policy,
            "get_first_sequence_number",
            &mut self.shutdown_rx,
            || source.get_first_sequence_number(),
        )
        .await?
        else {
            return Ok(ShutdownResult::Shutdown(()));
        };

        let ShutdownResult::Ok(last) = retry_until_shutdown(
            &policy,
            "get_last_sequence_number",
            &mut self.shutdown_rx,
            || source.get_last_sequence_number(),
        )
        .await?
        else {
            return Ok(ShutdownResult::Shutdown(()));
        };

        let ranges = partition_sequence_range(first, last, self.config.worker_count);
        info!(first, last, workers = ranges.len(), "planned copy");

        self.status.kvs_lsn = last;
        self.status.copy_end_sequence_number = last;
        self.status.applied_sequence_number = first - 1;
        self.status.worker_statuses = plan_round(RoundKind::Copy, ranges);

        self.transition(MigrationPhase::Copying).await?;

        Ok(ShutdownResult::Ok(()))
    }

    async fn copy(&mut self) -> MigrationResult<ShutdownResult<(), ()>> {
        if self.run_round(RoundKind::Copy).await?.should_shutdown() {
            return Ok(ShutdownResult::Shutdown(()));
        }

        self.status.applied_sequence_number = self
            .status
            .applied_sequence_number
            .max(self.status.copy_end_sequence_number);

        self.transition(MigrationPhase::CatchingUp).await?;

        Ok(ShutdownResult::Ok(()))
    }

    async fn catch_up(&mut self) -> MigrationResult<ShutdownResult<(), ()>> {
        let policy = RetryPolicy::unbounded(&self.config.copy_retry);

        loop {
            let source = &self.source;
            let ShutdownResult::Ok(kvs_lsn) = retry_until_shutdown(
                &policy,
                "get_last_sequence_number",
                &mut self.shutdown_rx,
                || source.get_last_sequence_number(),
            )
            .await?
            else {
                return Ok(ShutdownResult::Shutdown(()));
            };

            self.status.kvs_lsn = kvs_lsn;
            let watermark = self.status.applied_sequence_number;

            if should_enter_downtime(kvs_lsn, watermark, self.config.downtime_threshold) {
                info!(
                    kvs_lsn,
                    watermark,
                    lag = self.status.lag(),
                    "lag is within the downtime threshold"
                );
                self.transition(MigrationPhase::Downtime).await?;

                return Ok(ShutdownResult::Ok(()));
            }

            self.status.catch_up_rounds += 1;
            let kind = RoundKind::CatchUp {
                round: self.status.catch_up_rounds,
            };
            let ranges = partition_sequence_range(watermark + 1, kvs_lsn, self.config.worker_count);
            self.status.worker_statuses = plan_round(kind, ranges);
            self.persist().await?;

            if self.run_round(kind).await?.should_shutdown() {
                return Ok(ShutdownResult::Shutdown(()));
            }
        }
    }

    async fn downtime(&mut self) -> MigrationResult<ShutdownResult<(), ()>> {
        let policy = RetryPolicy::bounded(&self.config.downtime_retry);
        let source = &self.source;

        let rejected = retry_until_shutdown(
            &policy,
            "try_abort_existing_transactions_and_reject_writes",
            &mut self.shutdown_rx,
            || async move {
                if source
                    .try_abort_existing_transactions_and_reject_writes()
                    .await?
                {
                    Ok(())
                } else {
                    Err(migration_error!(
                        ErrorKind::WritesDrainFailed,
                        "Source could not drain its in-flight writes"
                    ))
                }
            },
        )
        .await?;
        if rejected.should_shutdown() {
            return Ok(ShutdownResult::Shutdown(()));
        }

        let ShutdownResult::Ok(kvs_lsn) = retry_until_shutdown(
            &policy,
            "get_last_sequence_number",
            &mut self.shutdown_rx,
            || source.get_last_sequence_number(),
        )
        .await?
        else {
            return Ok(ShutdownResult::Shutdown(()));
        };

        self.status.kvs_lsn = kvs_lsn;
        let watermark = self.status.applied_sequence_number;
        info!(kvs_lsn, watermark, "source rejects writes, running the final pass");

        let ranges = partition_sequence_range(watermark + 1, kvs_lsn, self.config.worker_count);
        self.status.worker_statuses = plan_round(RoundKind::Downtime, ranges);
        self.persist().await?;

        if self.run_round(RoundKind::Downtime).await?.should_shutdown() {
            return Ok(ShutdownResult::Shutdown(()));
        }

        self.transition(MigrationPhase::Verifying).await?;

        Ok(ShutdownResult::Ok(()))
    }

    async fn verify(&mut self) -> MigrationResult<ShutdownResult<(), ()>> {
        let policy = RetryPolicy::bounded(&self.config.downtime_retry);
        let chunk_size = self.config.chunk_size;
        let chunks_per_enumeration = self.config.chunks_per_enumeration();

        let report = retry(&policy, "verify_migration", || {
            verification::verify(&self.source, &self.store, chunk_size, chunks_per_enumeration)
        })
        .await?;

        if !report.is_match {
            bail!(
                ErrorKind::VerificationFailed,
                "Migrated records do not match the source",
                report
            );
        }

        self.transition(MigrationPhase::Completed).await?;
        info!("migration completed");

        Ok(ShutdownResult::Ok(()))
    }

    /// Runs the workers planned in the status until all of them stop.
    ///
    /// Progress is checkpointed every `checkpoint_interval_ms` and once more when
    /// the round ends. A failed worker stops the other workers of the round.
    async fn run_round(&mut self, kind: RoundKind) -> MigrationResult<ShutdownResult<(), ()>> {
        let progress: Vec<WorkerProgress> = self
            .status
            .worker_statuses
            .iter()
            .map(WorkerProgress::from_status)
            .collect();

        let (round_shutdown_tx, round_shutdown_rx) = create_shutdown_channel();

        {
            let mut pool = self.pool.lock().await;
            for worker_progress in progress.iter().filter(|progress| !progress.is_complete()) {
                let worker = MigrationWorker::new(
                    worker_progress.clone(),
                    kind,
                    self.config.clone(),
                    self.pool.clone(),
                    self.source.clone(),
                    self.store.clone(),
                    round_shutdown_rx.clone(),
                );
                pool.start_worker(worker).await?;
            }

            info!(
                round = %kind,
                workers = progress.len(),
                started = pool.active_count(),
                "round started"
            );
        }

        let period = Duration::from_millis(self.config.checkpoint_interval_ms.max(1));
        let mut checkpoint = tokio::time::interval_at(Instant::now() + period, period);
        checkpoint.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut shutdown_requested = false;
        let mut failure_observed = false;
        loop {
            let pool = self.pool.lock().await;
            if pool.active_count() == 0 {
                break;
            }

            if pool.has_failures() && !failure_observed {
                failure_observed = true;
                warn!(round = %kind, "a worker failed, stopping the round");
                let _ = round_shutdown_tx.shutdown();
            }

            let pool_update = pool.pool_update();
            let worker_finished = pool_update.notified();
            drop(pool);

            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed(), if !shutdown_requested => {
                    info!(round = %kind, "shutdown signal received, stopping the round");
                    shutdown_requested = true;
                    let _ = round_shutdown_tx.shutdown();
                }

                _ = worker_finished => {}

                _ = checkpoint.tick() => {
                    self.record_progress(&progress);
                    if let Err(err) = self.store.store_migration_status(self.status.clone()).await {
                        warn!(error = %err, "failed to checkpoint migration progress");
                    }
                }
            }
        }

        let round_result = self.pool.wait_all().await;

        self.record_progress(&progress);
        let persisted = self.persist().await;

        round_result?;
        persisted?;

        if shutdown_requested {
            return Ok(ShutdownResult::Shutdown(()));
        }

        info!(
            round = %kind,
            applied_sequence_number = self.status.applied_sequence_number,
            "round completed"
        );

        Ok(ShutdownResult::Ok(()))
    }

    fn record_progress(&mut self, progress: &[WorkerProgress]) {
        let worker_statuses: Vec<WorkerStatus> =
            progress.iter().map(WorkerProgress::snapshot).collect();

        if let Some(watermark) = contiguous_watermark(&worker_statuses) {
            self.status.applied_sequence_number =
                self.status.applied_sequence_number.max(watermark);
        }
        self.status.worker_statuses = worker_statuses;
    }

    async fn handle_failure(&mut self, err: MigrationError) -> MigrationError {
        let phase = self.status.current_migration_phase;
        error!(%phase, error = %err, "migration failed");

        let writes_rejected = phase.rejects_source_writes();
        if writes_rejected {
            let policy = RetryPolicy::bounded(&self.config.downtime_retry);
            let source = &self.source;
            match retry(&policy, "resume_writes", || source.resume_writes()).await {
                Ok(true) => info!("source accepts writes again"),
                Ok(false) => warn!("source did not confirm that it accepts writes again"),
                Err(resume_err) => {
                    error!(error = %resume_err, "failed to resume writes on the source");
                }
            }
        }

        let target = if err.has_kind(ErrorKind::DataLoss) {
            Some(MigrationPhase::Aborted)
        } else if writes_rejected {
            Some(MigrationPhase::RolledBack)
        } else {
            None
        };

        if let Some(target) = target {
            if let Err(persist_err) = self.transition(target).await {
                error!(error = %persist_err, "failed to persist the migration failure");
            }
        }

        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downtime_starts_once_lag_is_within_threshold() {
        assert!(should_enter_downtime(960, 910, 50));
        assert!(!should_enter_downtime(960, 900, 50));
        assert!(should_enter_downtime(100, 100, 0));
        assert!(should_enter_downtime(-1, -1, 0));
    }

    #[test]
    fn rounds_are_planned_with_stable_worker_ids() {
        let workers = plan_round(RoundKind::Downtime, partition_sequence_range(10, 19, 2));

        assert_eq!(workers.len(), 2);
        assert_eq!(workers[0].worker_id, "downtime-0");
        assert_eq!(workers[1].start_sequence_number, 15);
        assert_eq!(workers[1].last_applied_seq_num, 14);
    }
}
