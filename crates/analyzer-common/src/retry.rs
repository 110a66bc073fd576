//! Exponential backoff retry helper shared by the Alert Producer (C5),
//! the Alert Processor dispatch loop (C6), and the bus client.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::Error;

/// Backoff parameters. `base_delay * 2^attempt`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Retries `op` up to `config.max_attempts` times with exponential backoff,
/// doubling each attempt and capping at `max_delay`. Returns
/// the last error once attempts are exhausted. Cancellation-safe: a
/// cancelled `tokio::select!` around this future simply drops it mid-sleep.
pub async fn retry_with_backoff<T, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < config.max_attempts => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    attempt = attempt,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                debug!(attempts = attempt + 1, "retry attempts exhausted");
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_doubles_and_caps() {
        let cfg = RetryConfig::new(10, Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(cfg.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(cfg.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(cfg.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(cfg.delay_for_attempt(10), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let attempts = AtomicU32::new(0);
        let cfg = RetryConfig::new(5, Duration::from_millis(1), Duration::from_millis(5));
        let result = retry_with_backoff(&cfg, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::Dispatch("boom".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_short_circuits() {
        let attempts = AtomicU32::new(0);
        let cfg = RetryConfig::new(5, Duration::from_millis(1), Duration::from_millis(5));
        let result: Result<(), Error> = retry_with_backoff(&cfg, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::NotFound("missing".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn returns_last_error_after_exhaustion() {
        let cfg = RetryConfig::new(3, Duration::from_millis(1), Duration::from_millis(5));
        let result: Result<(), Error> =
            retry_with_backoff(&cfg, || async { Err(Error::Dispatch("always fails".into())) })
                .await;
        assert!(result.is_err());
    }
}
