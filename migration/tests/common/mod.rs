use migration::source::log::KvsLog;
use migration::store::memory::MemoryStore;
use migration::test_utils::migration::MemoryKvsService;
use migration::types::PartitionId;
use uuid::Uuid;

pub fn new_partition_id() -> PartitionId {
    Uuid::new_v4()
}

/// Live records of the source log as `(key, value)` pairs, sorted by key.
pub async fn source_live_records(service: &MemoryKvsService) -> Vec<(String, Vec<u8>)> {
    let log = service.log();
    let first = log.first_sequence_number().await.unwrap();
    let last = log.last_sequence_number().await.unwrap();

    let mut records: Vec<_> = log
        .read_range(first, last, usize::MAX, false)
        .await
        .unwrap()
        .into_iter()
        .map(|record| (record.key, record.value.unwrap_or_default()))
        .collect();
    records.sort();

    records
}

pub async fn assert_destination_matches_source(service: &MemoryKvsService, store: &MemoryStore) {
    let expected = source_live_records(service).await;
    let actual = store.live_records().await;

    assert_eq!(actual.len(), expected.len());
    assert_eq!(actual, expected);
}
