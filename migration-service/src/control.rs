//! Object-safe views of the components served by the control surface.
//!
//! Routes receive them as `web::Data<dyn ...>`, which keeps handlers free of the
//! store and source type parameters chosen at startup.

use async_trait::async_trait;
use migration::controller::MigrationController;
use migration::error::MigrationResult;
use migration::source::base::{EnumerationStream, SequenceStore};
use migration::source::log::KvsLog;
use migration::source::service::KvsService;
use migration::store::base::{DestinationStore, GateStateStore, StatusStore};
use migration::types::{EnumerationRequest, MigrationStatus, SequenceNumber};
use migration::verification::VerificationReport;

/// Operations of a source replica.
#[async_trait]
pub trait KvsControl: Send + Sync {
    async fn first_sequence_number(&self) -> MigrationResult<SequenceNumber>;

    async fn last_sequence_number(&self) -> MigrationResult<SequenceNumber>;

    async fn enumerate(&self, request: EnumerationRequest) -> MigrationResult<EnumerationStream>;

    async fn reject_writes(&self) -> MigrationResult<bool>;

    async fn resume_writes(&self) -> MigrationResult<bool>;

    async fn get(&self, key: &str) -> MigrationResult<Option<Vec<u8>>>;

    async fn put(&self, key: String, value: Vec<u8>) -> MigrationResult<SequenceNumber>;

    async fn delete(&self, key: &str) -> MigrationResult<Option<SequenceNumber>>;
}

#[async_trait]
impl<L, G> KvsControl for KvsService<L, G>
where
    L: KvsLog + Send + Sync + 'static,
    G: GateStateStore + Send + Sync + 'static,
{
    async fn first_sequence_number(&self) -> MigrationResult<SequenceNumber> {
        self.get_first_sequence_number().await
    }

    async fn last_sequence_number(&self) -> MigrationResult<SequenceNumber> {
        self.get_last_sequence_number().await
    }

    async fn enumerate(&self, request: EnumerationRequest) -> MigrationResult<EnumerationStream> {
        SequenceStore::enumerate(self, request).await
    }

    async fn reject_writes(&self) -> MigrationResult<bool> {
        self.try_abort_existing_transactions_and_reject_writes()
            .await
    }

    async fn resume_writes(&self) -> MigrationResult<bool> {
        SequenceStore::resume_writes(self).await
    }

    async fn get(&self, key: &str) -> MigrationResult<Option<Vec<u8>>> {
        KvsService::get(self, key).await
    }

    async fn put(&self, key: String, value: Vec<u8>) -> MigrationResult<SequenceNumber> {
        KvsService::put(self, key, value).await
    }

    async fn delete(&self, key: &str) -> MigrationResult<Option<SequenceNumber>> {
        KvsService::delete(self, key).await
    }
}

/// Operations of a destination replica.
#[async_trait]
pub trait MigrationControl: Send + Sync {
    async fn migration_status(&self) -> MigrationResult<MigrationStatus>;

    async fn verify_migration(&self) -> MigrationResult<VerificationReport>;

    async fn resume_writes_on_source(&self) -> MigrationResult<bool>;
}

#[async_trait]
impl<S, D> MigrationControl for MigrationController<S, D>
where
    S: SequenceStore + Send + Sync,
    D: DestinationStore + StatusStore + Send + Sync,
{
    async fn migration_status(&self) -> MigrationResult<MigrationStatus> {
        MigrationController::migration_status(self).await
    }

    async fn verify_migration(&self) -> MigrationResult<VerificationReport> {
        MigrationController::verify_migration(self).await
    }

    async fn resume_writes_on_source(&self) -> MigrationResult<bool> {
        MigrationController::resume_writes_on_source(self).await
    }
}
