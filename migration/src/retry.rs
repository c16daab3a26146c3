//! Error classification and retry with capped exponential backoff.

use migration_config::shared::RetryConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx};
use crate::error::{ErrorKind, MigrationError, MigrationResult};

/// How an error may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RetryClass {
    /// Network or availability failures, retried as long as the policy allows.
    Transient,
    /// Failures that may heal but must not loop forever, always bounded by `max_attempts`.
    Bounded,
    /// Never retried.
    Fatal,
}

fn classify_kind(kind: ErrorKind) -> RetryClass {
    match kind {
        ErrorKind::SourceUnavailable
        | ErrorKind::SourceIoError
        | ErrorKind::DestinationConnectionFailed
        | ErrorKind::DestinationIoError
        | ErrorKind::IoError => RetryClass::Transient,
        ErrorKind::SourceRequestFailed
        | ErrorKind::DestinationQueryFailed
        | ErrorKind::PageIntegrityMismatch
        | ErrorKind::WritesDrainFailed => RetryClass::Bounded,
        _ => RetryClass::Fatal,
    }
}

/// Classifies an error at the boundary where it is handled.
///
/// Aggregated errors take the most severe class of their members.
pub fn classify(error: &MigrationError) -> RetryClass {
    error
        .kinds()
        .into_iter()
        .map(classify_kind)
        .max()
        .unwrap_or(RetryClass::Fatal)
}

/// Whether transient errors are bounded by the attempt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryBudget {
    Unbounded,
    Bounded,
}

/// Retry settings attached to a phase of the migration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
    budget: RetryBudget,
}

impl RetryPolicy {
    fn from_config(config: &RetryConfig, budget: RetryBudget) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms.max(config.initial_delay_ms)),
            backoff_factor: f64::from(config.backoff_factor).max(1.0),
            budget,
        }
    }

    /// Retries transient errors indefinitely.
    pub fn unbounded(config: &RetryConfig) -> Self {
        Self::from_config(config, RetryBudget::Unbounded)
    }

    /// Retries every retryable error at most `max_attempts` times.
    pub fn bounded(config: &RetryConfig) -> Self {
        Self::from_config(config, RetryBudget::Bounded)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            attempts: 0,
            budgeted_failures: 0,
        }
    }
}

/// Backoff state of one retried operation.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempts: u32,
    /// Failures counted against `max_attempts`. Transient failures under an
    /// unbounded policy are not.
    budgeted_failures: u32,
}

impl Backoff {
    /// Number of failed attempts recorded so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Forgets earlier failures after the operation made progress.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.budgeted_failures = 0;
    }

    /// Records a failure and returns the delay before the next attempt, or [`None`]
    /// when `error` must be surfaced.
    pub fn next_delay(&mut self, error: &MigrationError) -> Option<Duration> {
        let budgeted = match (classify(error), self.policy.budget) {
            (RetryClass::Fatal, _) => return None,
            (RetryClass::Transient, RetryBudget::Unbounded) => false,
            (RetryClass::Transient, RetryBudget::Bounded) | (RetryClass::Bounded, _) => true,
        };

        if budgeted {
            if self.budgeted_failures >= self.policy.max_attempts {
                return None;
            }
            self.budgeted_failures += 1;
        }

        let delay = self.delay_for(self.attempts);
        self.attempts = self.attempts.saturating_add(1);

        Some(delay)
    }

    /// Capped exponential delay with jitter in `[delay / 2, delay]`.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(32) as i32;
        let base = self.policy.initial_delay.as_secs_f64() * self.policy.backoff_factor.powi(exponent);
        let capped = base.min(self.policy.max_delay.as_secs_f64());
        let jittered = rand::thread_rng().gen_range((capped / 2.0)..=capped);

        Duration::from_secs_f64(jittered)
    }
}

/// Runs `operation` until it succeeds or its error must be surfaced.
///
/// On exhaustion the error of the last attempt is returned unchanged.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut f: F,
) -> MigrationResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = MigrationResult<T>>,
{
    let mut backoff = policy.backoff();
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let Some(delay) = backoff.next_delay(&err) else {
                    return Err(err);
                };

                warn!(
                    operation,
                    attempt = backoff.attempts(),
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Like [`retry`], but stops waiting for the next attempt when shutdown is signalled.
pub async fn retry_until_shutdown<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    shutdown_rx: &mut ShutdownRx,
    mut f: F,
) -> MigrationResult<ShutdownResult<T, ()>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = MigrationResult<T>>,
{
    let mut backoff = policy.backoff();
    loop {
        let result = tokio::select! {
            biased;

            _ = shutdown_rx.changed() => return Ok(ShutdownResult::Shutdown(())),
            result = f() => result,
        };

        match result {
            Ok(value) => return Ok(ShutdownResult::Ok(value)),
            Err(err) => {
                let Some(delay) = backoff.next_delay(&err) else {
                    return Err(err);
                };

                warn!(
                    operation,
                    attempt = backoff.attempts(),
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "operation failed, retrying"
                );

                tokio::select! {
                    biased;

                    _ = shutdown_rx.changed() => return Ok(ShutdownResult::Shutdown(())),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
