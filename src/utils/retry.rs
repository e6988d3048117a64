//! Retry utilities with exponential backoff for resilient API calls.

use std::time::Duration;
use tokio::time::{sleep, timeout};

use crate::stores::StoreError;

/// Configuration for retry behavior
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts (1 means no retry)
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Maximum total time to spend on retries (including delays)
    pub max_total_time: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            max_total_time: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Set the maximum number of retries after the first attempt
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_attempts = retries.saturating_add(1);
        self
    }

    fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return self.initial_delay;
        }
        let exp_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powf(attempt as f64 - 1.0);
        Duration::from_secs_f64(exp_delay.min(self.max_delay.as_secs_f64()))
    }
}

/// Transient errors that should trigger a retry
#[derive(Debug, Clone, PartialEq)]
pub enum TransientError {
    /// Network connectivity issues
    Network,
    /// Rate limit exceeded (with optional retry-after seconds)
    RateLimit(Option<u64>),
    /// Server error (5xx)
    ServerError,
    /// Service unavailable (503)
    ServiceUnavailable,
    /// Gateway timeout (504)
    GatewayTimeout,
}

impl TransientError {
    /// Check if a StoreError represents a transient error
    pub fn from_store_error(err: &StoreError) -> Option<Self> {
        match err {
            StoreError::RateLimit(retry_after) => Some(TransientError::RateLimit(*retry_after)),
            StoreError::Network(_) => Some(TransientError::Network),
            StoreError::Api { status, .. } => match *status {
                503 => Some(TransientError::ServiceUnavailable),
                504 => Some(TransientError::GatewayTimeout),
                s if s >= 500 => Some(TransientError::ServerError),
                _ => None,
            },
            _ => None,
        }
    }

    /// Get the minimum delay for this error
    pub fn recommended_delay(&self) -> Duration {
        match self {
            TransientError::RateLimit(Some(seconds)) => Duration::from_secs(*seconds),
            TransientError::RateLimit(None) => Duration::from_secs(5),
            TransientError::ServiceUnavailable => Duration::from_secs(2),
            TransientError::GatewayTimeout => Duration::from_secs(1),
            TransientError::Network | TransientError::ServerError => Duration::ZERO,
        }
    }
}

/// Execute an async operation with retry logic
///
/// Permanent errors are returned immediately; transient ones are retried
/// until `max_attempts` or `max_total_time` is exhausted.
pub async fn with_retry<T, F, Fut>(config: RetryConfig, operation: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    let mut attempts = 0;
    let mut total_elapsed = Duration::ZERO;
    let mut operation = operation;

    loop {
        attempts += 1;

        match timeout(config.max_total_time, operation()).await {
            Ok(Ok(result)) => {
                if attempts > 1 {
                    tracing::info!(
                        "Operation succeeded on attempt {} after {} transient failures",
                        attempts,
                        attempts - 1
                    );
                }
                return Ok(result);
            }
            Ok(Err(error)) => {
                let Some(transient) = TransientError::from_store_error(&error) else {
                    return Err(error);
                };

                let delay = std::cmp::max(config.backoff(attempts), transient.recommended_delay());
                total_elapsed += delay;

                if attempts >= config.max_attempts || total_elapsed >= config.max_total_time {
                    if config.max_attempts > 1 {
                        tracing::warn!(
                            "Operation failed after {} attempts (total elapsed: {:?}): {}",
                            attempts,
                            total_elapsed,
                            error
                        );
                    }
                    return Err(error);
                }

                tracing::debug!(
                    "Transient error on attempt {}: {:?}, retrying in {:?}",
                    attempts,
                    transient,
                    delay
                );
                sleep(delay).await;
            }
            Err(_) => {
                let error = StoreError::Network("Operation timed out".to_string());
                if attempts >= config.max_attempts {
                    return Err(error);
                }

                let delay = config.initial_delay;
                total_elapsed += delay;
                tracing::debug!("Operation timed out, attempt {}/{}", attempts, config.max_attempts);
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            backoff_multiplier: 2.0,
            max_total_time: Duration::from_secs(5),
        }
    }

    /// Run `with_retry` over a script of per-attempt outcomes; returns the
    /// result and the number of attempts made.
    async fn run_script(
        config: RetryConfig,
        script: fn(u32) -> Result<&'static str, StoreError>,
    ) -> (Result<&'static str, StoreError>, u32) {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result = with_retry(config, move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { script(attempt) }
        })
        .await;
        (result, attempts.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_first_attempt_succeeds() {
        let (result, attempts) = run_script(RetryConfig::default(), |_| Ok("rows")).await;
        assert_eq!(result.unwrap(), "rows");
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let (result, attempts) = run_script(fast_config(4), |attempt| {
            if attempt < 3 {
                Err(StoreError::Api {
                    status: 500,
                    message: "internal".to_string(),
                })
            } else {
                Ok("rows")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "rows");
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let (result, attempts) = run_script(fast_config(5), |_| {
            Err(StoreError::NotFound("orders".to_string()))
        })
        .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_no_retry_makes_one_attempt() {
        let (result, attempts) =
            run_script(RetryConfig::no_retry(), |_| Err(StoreError::Network("reset".into()))).await;
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let (result, attempts) =
            run_script(fast_config(3), |_| Err(StoreError::Network("reset".into()))).await;
        assert!(matches!(result, Err(StoreError::Network(_))));
        assert_eq!(attempts, 3);
    }

    #[test]
    fn test_transient_classification() {
        assert_eq!(
            TransientError::from_store_error(&StoreError::RateLimit(Some(3))),
            Some(TransientError::RateLimit(Some(3)))
        );
        assert_eq!(
            TransientError::from_store_error(&StoreError::Api {
                status: 503,
                message: String::new()
            }),
            Some(TransientError::ServiceUnavailable)
        );
        assert!(TransientError::from_store_error(&StoreError::Api {
            status: 409,
            message: String::new()
        })
        .is_none());
        assert!(TransientError::from_store_error(&StoreError::Parse("bad".into())).is_none());
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = fast_config(10);
        assert_eq!(config.backoff(1), Duration::from_millis(5));
        assert_eq!(config.backoff(2), Duration::from_millis(10));
        assert_eq!(config.backoff(8), Duration::from_millis(20));
        assert_eq!(RetryConfig::default().max_retries(4).max_attempts, 5);
    }
}
