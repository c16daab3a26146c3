use migration_config::shared::{MigrationConfig, RetryConfig};
use std::sync::Arc;
use std::time::Duration;

use crate::source::memory::MemoryKvsLog;
use crate::source::service::KvsService;
use crate::store::memory::MemoryStore;
use crate::test_utils::restarter::CountingReplicaRestarter;
use crate::types::SequenceNumber;

/// A source replica keeping its log and its gate state in memory.
pub type MemoryKvsService = KvsService<MemoryKvsLog, MemoryStore>;

pub const TEST_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Retries quickly so that failure paths run in milliseconds.
pub fn fast_retry_config() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        backoff_factor: 2.0,
    }
}

pub fn test_migration_config(worker_count: u16) -> MigrationConfig {
    MigrationConfig {
        worker_count,
        downtime_threshold: 50,
        chunk_size: 100,
        items_per_enumeration: 1_000,
        kvs_endpoint: "http://127.0.0.1:0".to_string(),
        checkpoint_interval_ms: 10,
        request_timeout_ms: 5_000,
        copy_retry: fast_retry_config(),
        downtime_retry: fast_retry_config(),
    }
}

/// Starts an in-memory source replica that accepts writes.
pub async fn spawn_source_replica() -> (MemoryKvsService, Arc<CountingReplicaRestarter>) {
    let restarter = Arc::new(CountingReplicaRestarter::new());
    let service = KvsService::start(
        Arc::new(MemoryKvsLog::new()),
        MemoryStore::new(),
        restarter.clone(),
        TEST_DRAIN_TIMEOUT,
    )
    .await
    .expect("failed to start the source replica");

    (service, restarter)
}

pub fn actor_state_key(index: usize) -> String {
    format!("actor-{index}_state")
}

pub fn actor_state_value(index: usize, revision: usize) -> Vec<u8> {
    format!("value-{index}-{revision}").into_bytes()
}

/// Writes `count` actor state keys and returns the sequence number of each write.
pub async fn seed_actor_states(service: &MemoryKvsService, count: usize) -> Vec<SequenceNumber> {
    let mut sequence_numbers = Vec::with_capacity(count);
    for index in 0..count {
        let sequence_number = service
            .put(actor_state_key(index), actor_state_value(index, 0))
            .await
            .expect("failed to seed the source log");
        sequence_numbers.push(sequence_number);
    }

    sequence_numbers
}
