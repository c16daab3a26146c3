use serde::{Deserialize, Serialize};
use std::future::Future;

use crate::error::MigrationResult;
use crate::hash::ContentDigest;
use crate::types::{MigrationStatus, SequenceNumber, SequenceRecord};

/// A record as held by the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub version: SequenceNumber,
    pub value: Option<Vec<u8>>,
    pub is_deleted: bool,
}

impl From<&SequenceRecord> for StoredRecord {
    fn from(record: &SequenceRecord) -> Self {
        Self {
            version: record.version,
            value: if record.is_deleted {
                None
            } else {
                record.value.clone()
            },
            is_deleted: record.is_deleted,
        }
    }
}

/// Trait for the destination of migrated records.
///
/// Applies are idempotent: a record replaces the stored one only when its
/// version is strictly greater (last writer wins). Tombstones are stored like any
/// other record so that an older live record applied later can't resurrect a
/// deleted key.
pub trait DestinationStore {
    /// Atomically applies a chunk of records and returns how many replaced a
    /// stored record or created a new one.
    fn apply_records(
        &self,
        records: Vec<SequenceRecord>,
    ) -> impl Future<Output = MigrationResult<u64>> + Send;

    /// Returns the stored record of `key`, tombstones included.
    fn get_record(
        &self,
        key: &str,
    ) -> impl Future<Output = MigrationResult<Option<StoredRecord>>> + Send;

    /// Digest over the live records, in version order.
    fn compute_digest(&self) -> impl Future<Output = MigrationResult<ContentDigest>> + Send;
}

/// Trait for storing the durable [`MigrationStatus`] of the partition.
pub trait StatusStore {
    fn get_migration_status(
        &self,
    ) -> impl Future<Output = MigrationResult<Option<MigrationStatus>>> + Send;

    /// Replaces the stored status in a single write.
    fn store_migration_status(
        &self,
        status: MigrationStatus,
    ) -> impl Future<Output = MigrationResult<()>> + Send;
}

/// Trait for persisting the write gate of a source replica across restarts.
pub trait GateStateStore {
    /// Returns the persisted reject-writes flag, [`None`] if it was never saved.
    fn load_reject_write_status(
        &self,
    ) -> impl Future<Output = MigrationResult<Option<bool>>> + Send;

    fn save_reject_write_status(
        &self,
        reject_writes: bool,
    ) -> impl Future<Output = MigrationResult<()>> + Send;
}
