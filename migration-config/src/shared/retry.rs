use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Retry policy configuration for calls that can fail transiently.
///
/// Whether `max_attempts` bounds a given retry loop depends on the migration
/// phase: transient failures while copying are retried indefinitely, during
/// downtime the budget applies.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts before giving up.
    pub max_attempts: u32,
    /// Initial delay, in milliseconds, before the first retry.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries.
    pub max_delay_ms: u64,
    /// Exponential backoff multiplier applied to the delay after each attempt.
    pub backoff_factor: f32,
}

impl RetryConfig {
    pub fn validate(&self, name: &'static str) -> Result<(), ValidationError> {
        if self.initial_delay_ms == 0 || self.backoff_factor < 1.0 {
            return Err(ValidationError::InvalidRetryConfig(name));
        }

        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_factor: 2.0,
        }
    }
}
