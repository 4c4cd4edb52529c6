use std::{future::Future, time::Duration};
use tokio::time::sleep;
use tracing::warn;

use crate::error::{DedupError, Result};

/// Bounded retry with exponential backoff and a deadline per attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(30),
        }
    }

    /// MusicBrainz recording search.
    pub const fn metadata_search() -> Self {
        Self::new(10)
    }

    /// Library page fetch; exhaustion aborts the run.
    pub const fn page_fetch() -> Self {
        Self::new(3)
    }

    /// Scrobble deletion.
    pub const fn delete() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(10),
            ..Self::new(3)
        }
    }

    pub const fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub const fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    /// Delay before the attempt following `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error,
    /// or `max_attempts` is reached. The last error is returned.
    pub async fn run<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            let error = match tokio::time::timeout(self.attempt_timeout, operation()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_elapsed) => DedupError::Timeout {
                    operation: operation_name.to_string(),
                    timeout: self.attempt_timeout,
                },
            };

            if !error.is_retryable() {
                warn!(operation = operation_name, error = %error, "non-retryable failure");
                return Err(error);
            }

            if attempt + 1 < attempts {
                let delay = self.backoff(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "attempt failed, retrying"
                );
                sleep(delay).await;
            }
            last_error = Some(error);
        }

        Err(last_error.unwrap_or_else(|| DedupError::Timeout {
            operation: operation_name.to_string(),
            timeout: self.attempt_timeout,
        }))
    }
}
