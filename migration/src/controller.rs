use migration_config::shared::MigrationConfig;
use tracing::info;

use crate::bail;
use crate::error::{ErrorKind, MigrationResult};
use crate::source::base::SequenceStore;
use crate::store::base::{DestinationStore, StatusStore};
use crate::types::{MigrationStatus, PartitionId};
use crate::verification::{self, VerificationReport};

/// Operator-facing operations of a destination partition.
///
/// The controller never changes the phase of a migration. It reads the status
/// persisted by the orchestrator, compares both sides on demand and lets an
/// operator resume writes on the source by hand.
#[derive(Debug, Clone)]
pub struct MigrationController<S, D> {
    partition_id: PartitionId,
    config: MigrationConfig,
    source: S,
    store: D,
}

impl<S, D> MigrationController<S, D>
where
    S: SequenceStore + Send + Sync,
    D: DestinationStore + StatusStore + Send + Sync,
{
    pub fn new(partition_id: PartitionId, config: MigrationConfig, source: S, store: D) -> Self {
        Self {
            partition_id,
            config,
            source,
            store,
        }
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// Returns the persisted status, failing with
    /// [`ErrorKind::MissingMigrationStatus`] before a migration has started.
    pub async fn migration_status(&self) -> MigrationResult<MigrationStatus> {
        let Some(status) = self.store.get_migration_status().await? else {
            bail!(
                ErrorKind::MissingMigrationStatus,
                "No migration has been started for this partition",
                self.partition_id
            );
        };

        Ok(status)
    }

    /// Compares the live records of both sides without changing either.
    pub async fn verify_migration(&self) -> MigrationResult<VerificationReport> {
        info!(partition_id = %self.partition_id, "verification requested");

        verification::verify(
            &self.source,
            &self.store,
            self.config.chunk_size,
            self.config.chunks_per_enumeration(),
        )
        .await
    }

    /// Asks the source to accept writes again.
    pub async fn resume_writes_on_source(&self) -> MigrationResult<bool> {
        info!(partition_id = %self.partition_id, "resuming writes on the source");

        self.source.resume_writes().await
    }
}
