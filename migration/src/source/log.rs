use std::future::Future;

use crate::error::MigrationResult;
use crate::types::{SequenceNumber, SequenceRecord};

/// Versioned key-value log backing a source replica.
///
/// Every key lives at the sequence number of its latest write. Updating a key
/// moves it to a new sequence number, deleting it leaves a tombstone at a new
/// sequence number. Sequence numbers are never reused.
pub trait KvsLog {
    /// First sequence number still retained. Only advances on truncation.
    fn first_sequence_number(&self)
    -> impl Future<Output = MigrationResult<SequenceNumber>> + Send;

    /// Last sequence number handed out, `-1` for a log that never took a write.
    fn last_sequence_number(&self) -> impl Future<Output = MigrationResult<SequenceNumber>> + Send;

    /// Reads up to `limit` records with versions in `[start, end]`, in version order.
    ///
    /// Tombstones are skipped, and don't count against `limit`, unless
    /// `include_deletes` is set.
    fn read_range(
        &self,
        start: SequenceNumber,
        end: SequenceNumber,
        limit: usize,
        include_deletes: bool,
    ) -> impl Future<Output = MigrationResult<Vec<SequenceRecord>>> + Send;

    /// Returns the live value of `key`.
    fn get(&self, key: &str) -> impl Future<Output = MigrationResult<Option<Vec<u8>>>> + Send;

    /// Writes `value` under `key` and returns the sequence number of the write.
    fn put(
        &self,
        key: String,
        value: Vec<u8>,
    ) -> impl Future<Output = MigrationResult<SequenceNumber>> + Send;

    /// Deletes `key` and returns the sequence number of its tombstone, or [`None`]
    /// if the key had no live value.
    fn delete(
        &self,
        key: &str,
    ) -> impl Future<Output = MigrationResult<Option<SequenceNumber>>> + Send;
}
