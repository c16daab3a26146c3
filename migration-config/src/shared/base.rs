use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("`worker_count` must be greater than zero")]
    WorkerCountZero,
    #[error("`chunk_size` must be greater than zero")]
    ChunkSizeNotPositive,
    #[error("`items_per_enumeration` must be greater than zero")]
    ItemsPerEnumerationNotPositive,
    #[error("`downtime_threshold` cannot be negative")]
    NegativeDowntimeThreshold,
    #[error("`kvs_endpoint` cannot be empty")]
    MissingKvsEndpoint,
    #[error("`request_timeout_ms` must be greater than zero")]
    RequestTimeoutZero,
    #[error("retry config `{0}` has a zero initial delay or a backoff factor below 1")]
    InvalidRetryConfig(&'static str),
    #[error("Invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,
}
