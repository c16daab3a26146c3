use serde::{Deserialize, Serialize};

use crate::shared::{RetryConfig, ValidationError};

/// User settings of a migration run.
///
/// The settings are immutable for the lifetime of an orchestrator and are shared
/// with every worker it spawns.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MigrationConfig {
    /// Number of parallel workers, each owning a disjoint sequence number range.
    pub worker_count: u16,
    /// Maximum replication lag, in sequence numbers, tolerated before cutover.
    pub downtime_threshold: i64,
    /// Maximum number of records in an enumeration page.
    pub chunk_size: i64,
    /// Number of records requested per enumeration call.
    pub items_per_enumeration: i64,
    /// Base url of the source key-value store service.
    pub kvs_endpoint: String,
    /// Interval at which worker progress is persisted into the migration status.
    #[serde(default = "default_checkpoint_interval_ms")]
    pub checkpoint_interval_ms: u64,
    /// Time allowed for a request to the source service, body included.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Retry policy used while copying and catching up.
    #[serde(default)]
    pub copy_retry: RetryConfig,
    /// Retry policy used while writes are rejected on the source.
    #[serde(default)]
    pub downtime_retry: RetryConfig,
}

fn default_checkpoint_interval_ms() -> u64 {
    1_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl MigrationConfig {
    /// Validates the settings before any migration work starts.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.worker_count == 0 {
            return Err(ValidationError::WorkerCountZero);
        }

        if self.chunk_size <= 0 {
            return Err(ValidationError::ChunkSizeNotPositive);
        }

        if self.items_per_enumeration <= 0 {
            return Err(ValidationError::ItemsPerEnumerationNotPositive);
        }

        if self.downtime_threshold < 0 {
            return Err(ValidationError::NegativeDowntimeThreshold);
        }

        if self.kvs_endpoint.trim().is_empty() {
            return Err(ValidationError::MissingKvsEndpoint);
        }

        if self.request_timeout_ms == 0 {
            return Err(ValidationError::RequestTimeoutZero);
        }

        self.copy_retry.validate("copy_retry")?;
        self.downtime_retry.validate("downtime_retry")?;

        Ok(())
    }

    /// Number of pages requested per enumeration call.
    ///
    /// Always at least one page, even when `items_per_enumeration` is smaller
    /// than `chunk_size`.
    pub fn chunks_per_enumeration(&self) -> i32 {
        let chunks = self.items_per_enumeration / self.chunk_size;
        chunks.clamp(1, i32::MAX as i64) as i32
    }
}
