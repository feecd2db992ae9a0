//! Bounded retry for storage calls.
//!
//! Every attempt runs under a timeout. Only transient failures are retried,
//! with exponential backoff between attempts.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::RetryConfig;

/// Retry policy with per-attempt timeout and exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    operation_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
            Duration::from_millis(config.operation_timeout_ms),
        )
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff: max_backoff.max(initial_backoff),
            operation_timeout,
        }
    }

    /// Single attempt, no backoff. Useful in tests.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO, Duration::from_secs(5))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_backoff,
            initial_interval: self.initial_backoff,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.max_backoff,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }

    /// Run `operation` until it succeeds, fails non-transiently, or the
    /// attempt ceiling is reached.
    pub async fn execute<F, Fut, T>(&self, operation: &str, mut f: F) -> DomainResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DomainResult<T>>,
    {
        let mut schedule = self.schedule();
        let mut attempt = 1;

        loop {
            let result = match tokio::time::timeout(self.operation_timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(DomainError::transient(
                    operation,
                    format!("timed out after {:?}", self.operation_timeout),
                )),
            };

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let delay = schedule.next_backoff().unwrap_or(self.max_backoff);
                    warn!(
                        operation,
                        attempt,
                        error = %err,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) if err.is_transient() => {
                    warn!(operation, attempts = attempt, error = %err, "Retries exhausted");
                    return Err(DomainError::transient(
                        operation,
                        format!("gave up after {attempt} attempts: {err}"),
                    ));
                }
                Err(err) => return Err(err),
            }
        }
    }
}
