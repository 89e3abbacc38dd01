//! Retry with exponential backoff for provider calls.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::Result;

/// Default number of attempts per provider call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first retry in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;

/// Upper bound for a single backoff sleep in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Backoff policy for retryable provider errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub base_delay: Duration,
    /// Cap on a single delay.
    pub max_delay: Duration,
}

/// The outcome of a retried call and how many attempts it took.
#[derive(Debug)]
pub struct Attempted<T> {
    /// Final result.
    pub result: Result<T>,
    /// Attempts made (zero when the call never started).
    pub attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Sets the number of attempts.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub const fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Backoff before retry number `retry` (1-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, runs
    /// out of attempts, or the next sleep would cross `deadline`.
    pub async fn run<T, F, Fut>(&self, what: &str, deadline: Option<Instant>, mut op: F) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let err = match op().await {
                Ok(value) => {
                    return Attempted {
                        result: Ok(value),
                        attempts,
                    };
                }
                Err(e) => e,
            };

            if !err.is_retryable() || attempts >= max_attempts {
                return Attempted {
                    result: Err(err),
                    attempts,
                };
            }

            let delay = err
                .retry_delay_ms()
                .map_or_else(|| self.delay_for(attempts), Duration::from_millis)
                .min(self.max_delay.max(self.base_delay));

            if let Some(deadline) = deadline
                && Instant::now() + delay >= deadline
            {
                debug!("Not retrying {what}: deadline reached");
                return Attempted {
                    result: Err(err),
                    attempts,
                };
            }

            warn!(
                "{what} failed (attempt {attempts}/{max_attempts}), retrying in {}ms: {err}",
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }
    }
}
