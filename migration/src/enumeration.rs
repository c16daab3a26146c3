//! Chunked enumeration of a source log by sequence number.

use futures::StreamExt;
use futures::stream;
use std::sync::Arc;
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, MigrationResult};
use crate::source::base::EnumerationStream;
use crate::source::log::KvsLog;
use crate::types::{EnumerationRequest, EnumerationResponse, SequenceNumber};

/// Serves [`EnumerationRequest`]s over a [`KvsLog`].
///
/// Every page is read from the log when the stream is polled, so enumerating is
/// safe while the log keeps taking writes: a key updated behind the cursor moves
/// past it and is enumerated again at its new version, a key updated past the
/// end of the range is left to a later enumeration.
#[derive(Debug)]
pub struct EnumerationService<L> {
    log: Arc<L>,
}

impl<L> EnumerationService<L> {
    pub fn new(log: Arc<L>) -> Self {
        Self { log }
    }
}

impl<L> Clone for EnumerationService<L> {
    fn clone(&self) -> Self {
        Self {
            log: self.log.clone(),
        }
    }
}

#[derive(Debug)]
struct Cursor<L> {
    log: Arc<L>,
    request: EnumerationRequest,
    next_sequence_number: SequenceNumber,
    pages_emitted: i32,
    finished: bool,
}

impl<L> EnumerationService<L>
where
    L: KvsLog + Send + Sync + 'static,
{
    /// Validates `request` and returns the stream of its pages.
    ///
    /// Fails with [`ErrorKind::DataLoss`] when the log no longer retains the start
    /// of the range. The same check runs again before every page.
    pub async fn enumerate(&self, request: EnumerationRequest) -> MigrationResult<EnumerationStream> {
        request.validate()?;

        let first_sequence_number = self.log.first_sequence_number().await?;
        check_retained(request.start_sequence_number, first_sequence_number)?;

        debug!(
            start = request.start_sequence_number,
            end = request.end_sequence_number,
            chunk_size = request.chunk_size,
            chunks = request.number_of_chunks_per_enumeration,
            include_deletes = request.include_deletes,
            "starting enumeration"
        );

        let cursor = Cursor {
            log: self.log.clone(),
            next_sequence_number: request.start_sequence_number,
            request,
            pages_emitted: 0,
            finished: false,
        };

        let pages = stream::try_unfold(cursor, |mut cursor| async move {
            if cursor.finished
                || cursor.pages_emitted >= cursor.request.number_of_chunks_per_enumeration
            {
                return Ok(None);
            }

            let page = cursor.read_page().await?;
            cursor.pages_emitted += 1;

            Ok(Some((page, cursor)))
        });

        Ok(pages.boxed())
    }
}

impl<L> Cursor<L>
where
    L: KvsLog + Send + Sync,
{
    async fn read_page(&mut self) -> MigrationResult<EnumerationResponse> {
        let first_sequence_number = self.log.first_sequence_number().await?;
        check_retained(self.next_sequence_number, first_sequence_number)?;

        let chunk_size = self.request.chunk_size;
        let limit = usize::try_from(chunk_size).unwrap_or(usize::MAX);
        let mut records = self
            .log
            .read_range(
                self.next_sequence_number,
                self.request.end_sequence_number,
                limit,
                self.request.include_deletes,
            )
            .await?;

        if self.request.resolve_actor_ids_for_state_kv_pairs {
            for record in records.iter_mut() {
                record.resolve_actor_id();
            }
        }

        let last_version = records.last().map(|record| record.version);
        let end_reached = (records.len() as i64) < chunk_size
            || last_version.is_some_and(|version| version >= self.request.end_sequence_number);

        if let Some(version) = last_version {
            self.next_sequence_number = version + 1;
        }
        self.finished = end_reached;

        Ok(EnumerationResponse::new(records, end_reached))
    }
}

fn check_retained(
    sequence_number: SequenceNumber,
    first_sequence_number: SequenceNumber,
) -> MigrationResult<()> {
    if sequence_number < first_sequence_number {
        bail!(
            ErrorKind::DataLoss,
            "Requested sequence numbers are no longer retained by the source",
            format!(
                "enumeration position {sequence_number} is before the first retained sequence number {first_sequence_number}"
            )
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::memory::MemoryKvsLog;
    use futures::TryStreamExt;

    async fn seeded_log(count: usize) -> Arc<MemoryKvsLog> {
        let log = Arc::new(MemoryKvsLog::new());
        for i in 0..count {
            log.put(format!("actor-{i}_state"), vec![i as u8]).await.unwrap();
        }
        log
    }

    async fn collect(
        service: &EnumerationService<MemoryKvsLog>,
        request: EnumerationRequest,
    ) -> MigrationResult<Vec<EnumerationResponse>> {
        service.enumerate(request).await?.try_collect().await
    }

    #[tokio::test]
    async fn thousand_records_are_served_in_ten_pages() {
        let service = EnumerationService::new(seeded_log(1_000).await);

        let pages = collect(&service, EnumerationRequest::new(0, 999, 100, 10, false))
            .await
            .unwrap();

        assert_eq!(pages.len(), 10);
        let mut expected = 0;
        for (i, page) in pages.iter().enumerate() {
            assert_eq!(page.key_value_pairs.len(), 100);
            assert_eq!(page.end_sequence_number_reached, i == 9);
            page.verify_integrity().unwrap();
            for record in &page.key_value_pairs {
                assert_eq!(record.version, expected);
                expected += 1;
            }
        }
        assert_eq!(expected, 1_000);
    }

    #[tokio::test]
    async fn enumeration_stops_after_the_requested_number_of_pages() {
        let service = EnumerationService::new(seeded_log(1_000).await);

        let pages = collect(&service, EnumerationRequest::new(0, 999, 100, 3, false))
            .await
            .unwrap();

        assert_eq!(pages.len(), 3);
        assert!(pages.iter().all(|page| !page.end_sequence_number_reached));
        assert_eq!(pages[2].last_version(), Some(299));
    }

    #[tokio::test]
    async fn short_page_is_final() {
        let service = EnumerationService::new(seeded_log(150).await);

        let pages = collect(&service, EnumerationRequest::new(0, 10_000, 100, 10, false))
            .await
            .unwrap();

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[1].key_value_pairs.len(), 50);
        assert!(pages[1].end_sequence_number_reached);
    }

    #[tokio::test]
    async fn empty_range_yields_a_single_final_page() {
        let service = EnumerationService::new(seeded_log(10).await);

        let pages = collect(&service, EnumerationRequest::new(20, 30, 5, 10, true))
            .await
            .unwrap();

        assert_eq!(pages.len(), 1);
        assert!(pages[0].key_value_pairs.is_empty());
        assert!(pages[0].end_sequence_number_reached);
        pages[0].verify_integrity().unwrap();
    }

    #[tokio::test]
    async fn tombstones_are_only_served_when_requested() {
        let log = seeded_log(4).await;
        log.delete("actor-1_state").await.unwrap();
        let service = EnumerationService::new(log);

        let live = collect(&service, EnumerationRequest::new(0, 10, 10, 1, false))
            .await
            .unwrap();
        assert_eq!(live[0].key_value_pairs.len(), 3);

        let all = collect(&service, EnumerationRequest::new(0, 10, 10, 1, true))
            .await
            .unwrap();
        let tombstones: Vec<_> = all[0]
            .key_value_pairs
            .iter()
            .filter(|record| record.is_deleted)
            .collect();
        assert_eq!(tombstones.len(), 1);
        assert_eq!(tombstones[0].version, 4);
    }

    #[tokio::test]
    async fn actor_ids_are_resolved_on_request() {
        let service = EnumerationService::new(seeded_log(2).await);

        let mut request = EnumerationRequest::new(0, 1, 10, 1, false);
        let pages = collect(&service, request.clone()).await.unwrap();
        assert!(pages[0].key_value_pairs[0].actor_id.is_none());

        request.resolve_actor_ids_for_state_kv_pairs = true;
        let pages = collect(&service, request).await.unwrap();
        assert_eq!(
            pages[0].key_value_pairs[1].actor_id.as_deref(),
            Some("actor-1")
        );
    }

    #[tokio::test]
    async fn start_before_first_retained_sequence_number_is_data_loss() {
        let log = seeded_log(10).await;
        log.truncate_through(4).await;
        let service = EnumerationService::new(log);

        let err = service
            .enumerate(EnumerationRequest::new(0, 9, 2, 5, false))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::DataLoss);
    }

    #[tokio::test]
    async fn truncation_during_enumeration_is_data_loss() {
        let log = seeded_log(10).await;
        let service = EnumerationService::new(log.clone());

        let mut pages = service
            .enumerate(EnumerationRequest::new(0, 9, 2, 5, false))
            .await
            .unwrap();
        assert!(pages.try_next().await.unwrap().is_some());

        log.truncate_through(5).await;

        let err = pages.try_next().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataLoss);
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected() {
        let service = EnumerationService::new(seeded_log(1).await);

        for request in [
            EnumerationRequest::new(5, 4, 10, 1, false),
            EnumerationRequest::new(0, 4, 0, 1, false),
            EnumerationRequest::new(0, 4, 10, 0, false),
        ] {
            let err = service.enumerate(request).await.err().unwrap();
            assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        }
    }
}
