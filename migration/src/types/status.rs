use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{PartitionId, SequenceNumber, SequenceRange};

/// Phase of a migration.
///
/// Phases advance in declaration order up to [`MigrationPhase::Completed`];
/// [`MigrationPhase::Aborted`] and [`MigrationPhase::RolledBack`] can be reached
/// from any earlier phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationPhase {
    Provisioning,
    Copying,
    CatchingUp,
    Downtime,
    Verifying,
    Completed,
    Aborted,
    RolledBack,
}

impl MigrationPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationPhase::Completed | MigrationPhase::Aborted | MigrationPhase::RolledBack
        )
    }

    /// Returns `true` for the phases in which the source is expected to reject writes.
    pub fn rejects_source_writes(&self) -> bool {
        matches!(
            self,
            MigrationPhase::Downtime | MigrationPhase::Verifying | MigrationPhase::Completed
        )
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Progress of a single worker over its assigned range.
///
/// Before anything is applied both watermarks sit at `start_sequence_number - 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WorkerStatus {
    pub worker_id: String,
    pub start_sequence_number: SequenceNumber,
    pub end_sequence_number: SequenceNumber,
    pub first_applied_seq_num: SequenceNumber,
    pub last_applied_seq_num: SequenceNumber,
}

impl WorkerStatus {
    pub fn new(worker_id: String, range: SequenceRange) -> Self {
        Self {
            worker_id,
            start_sequence_number: range.start,
            end_sequence_number: range.end,
            first_applied_seq_num: range.start - 1,
            last_applied_seq_num: range.start - 1,
        }
    }

    pub fn range(&self) -> SequenceRange {
        SequenceRange::new(self.start_sequence_number, self.end_sequence_number)
    }

    pub fn is_complete(&self) -> bool {
        self.last_applied_seq_num >= self.end_sequence_number
    }
}

/// Watermark up to which every sequence number of a round is applied.
///
/// Ranges of a round are contiguous, so this is the lowest watermark among the
/// unfinished workers, or the end of the round once all workers finished.
/// Returns [`None`] for a round without workers.
pub fn contiguous_watermark(workers: &[WorkerStatus]) -> Option<SequenceNumber> {
    let unfinished = workers
        .iter()
        .filter(|worker| !worker.is_complete())
        .map(|worker| worker.last_applied_seq_num)
        .min();

    unfinished.or_else(|| workers.iter().map(|worker| worker.end_sequence_number).max())
}

/// Durable status of a partition migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MigrationStatus {
    pub partition_id: PartitionId,
    pub migration_start_time_utc: DateTime<Utc>,
    pub current_migration_phase_start_time_utc: DateTime<Utc>,
    pub current_migration_phase: MigrationPhase,
    /// Last known sequence number of the source log.
    #[serde(rename = "KVS_LSN")]
    pub kvs_lsn: SequenceNumber,
    /// Workers of the current or last round.
    pub worker_statuses: Vec<WorkerStatus>,
    /// Every source sequence number up to this one is applied to the destination.
    pub applied_sequence_number: SequenceNumber,
    /// Source log position captured when the copy was planned.
    pub copy_end_sequence_number: SequenceNumber,
    pub catch_up_rounds: u32,
}

impl MigrationStatus {
    pub fn new(partition_id: PartitionId, now: DateTime<Utc>) -> Self {
        Self {
            partition_id,
            migration_start_time_utc: now,
            current_migration_phase_start_time_utc: now,
            current_migration_phase: MigrationPhase::Provisioning,
            kvs_lsn: -1,
            worker_statuses: Vec::new(),
            applied_sequence_number: -1,
            copy_end_sequence_number: -1,
            catch_up_rounds: 0,
        }
    }

    pub fn set_phase(&mut self, phase: MigrationPhase, now: DateTime<Utc>) {
        self.current_migration_phase = phase;
        self.current_migration_phase_start_time_utc = now;
    }

    /// Source sequence numbers not yet applied to the destination.
    pub fn lag(&self) -> i64 {
        self.kvs_lsn.saturating_sub(self.applied_sequence_number).max(0)
    }
}
