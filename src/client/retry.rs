//! Retry configuration and the shared retry helper.
//!
//! Only idempotent reads are retried; mutations go out once.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::{PunchclockError, Result};

/// Configuration for retry behaviour on transient errors.
///
/// ```rust
/// # use punchclock::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_attempts(5)
///     .initial_delay(Duration::from_millis(200));
/// assert_eq!(config.delay_for_attempt(1), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial request).
    /// 1 = no retry. Default: 3.
    pub max_attempts: u32,
    /// Base delay before the first retry. Default: 500ms.
    pub initial_delay: Duration,
    /// Maximum delay between retries. Default: 10s.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config that disables retries (single attempt).
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set maximum attempts (including the initial request).
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Set the base delay before the first retry.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Exponential backoff: `initial_delay * 2^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }

    /// Backoff for `attempt`, unless the server sent a `retry_after` hint.
    pub fn effective_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        retry_after.unwrap_or_else(|| self.delay_for_attempt(attempt))
    }
}

/// Execute an async operation, retrying transient errors.
///
/// Permanent errors are returned immediately.
pub(crate) async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: &str, f: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 0..config.max_attempts.max(1) {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_transient() => {
                if attempt + 1 < config.max_attempts {
                    let delay = config.effective_delay(attempt, e.retry_after());
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        max_attempts = config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                }
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| PunchclockError::Http(format!("{operation}: no attempt made"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_doubles_and_caps() {
        let config = RetryConfig::new()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(350));
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(350));
    }

    #[test]
    fn retry_after_hint_wins() {
        let config = RetryConfig::new();
        assert_eq!(
            config.effective_delay(0, Some(Duration::from_secs(7))),
            Duration::from_secs(7)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let attempts = AtomicU32::new(0);
        let result = with_retry(&RetryConfig::new(), "workspaces", || async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(PunchclockError::Http("connection reset".into()))
            } else {
                Ok(5)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 5);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = with_retry(&RetryConfig::new(), "workspaces", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(PunchclockError::AuthenticationFailed)
        })
        .await;
        assert!(matches!(result, Err(PunchclockError::AuthenticationFailed)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = with_retry(&RetryConfig::new().max_attempts(2), "tags", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(PunchclockError::Api {
                status: 503,
                message: "unavailable".into(),
            })
        })
        .await;
        assert!(matches!(result, Err(PunchclockError::Api { status: 503, .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
