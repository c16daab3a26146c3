use futures::stream::BoxStream;
use std::future::Future;

use crate::error::MigrationResult;
use crate::types::{EnumerationRequest, EnumerationResponse, SequenceNumber};

/// Lazy, finite stream of enumeration pages. Once consumed it can't be restarted,
/// a new enumeration is requested from the last applied version instead.
pub type EnumerationStream = BoxStream<'static, MigrationResult<EnumerationResponse>>;

/// The source side of a migration, as seen by the destination.
///
/// [`SequenceStore`] implementations either serve the source log in-process or
/// forward every call to a remote source replica. Any call may fail with
/// [`crate::error::ErrorKind::SourceUnavailable`], callers retry with backoff.
pub trait SequenceStore {
    /// Returns the first sequence number still retained by the source log.
    fn get_first_sequence_number(
        &self,
    ) -> impl Future<Output = MigrationResult<SequenceNumber>> + Send;

    /// Returns the last sequence number committed to the source log.
    ///
    /// The value may already be stale when it is returned if the source keeps
    /// accepting writes.
    fn get_last_sequence_number(
        &self,
    ) -> impl Future<Output = MigrationResult<SequenceNumber>> + Send;

    /// Starts an enumeration of the source log.
    ///
    /// Pages hold at most `ChunkSize` records in strictly increasing version
    /// order, and the last page of the requested range is flagged with
    /// `EndSequenceNumberReached`. A call returns at most
    /// `NumberOfChunksPerEnumeration` pages.
    fn enumerate(
        &self,
        request: EnumerationRequest,
    ) -> impl Future<Output = MigrationResult<EnumerationStream>> + Send;

    /// Waits for in-flight writes to finish and makes the source refuse new ones.
    ///
    /// Returns `false` when the in-flight writes could not be drained in time,
    /// in which case the source keeps accepting writes. Calling it again while
    /// writes are rejected returns `true`.
    fn try_abort_existing_transactions_and_reject_writes(
        &self,
    ) -> impl Future<Output = MigrationResult<bool>> + Send;

    /// Makes the source accept writes again.
    fn resume_writes(&self) -> impl Future<Output = MigrationResult<bool>> + Send;
}
