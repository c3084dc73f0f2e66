//! Retry utilities for resilient operations
//!
//! This module provides a common retry mechanism with exponential backoff.
//! The delivery client drives its attempts through [`with_retry`].

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::duration_millis;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,

    /// Base delay in milliseconds for exponential backoff
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds (caps exponential growth)
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff (default: 2.0)
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom max retries
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Configuration allowing `max_attempts` tries in total (at least one)
    pub fn attempts(max_attempts: u32) -> Self {
        Self::new(max_attempts.max(1) - 1)
    }

    /// Remove the delay cap
    pub fn uncapped(mut self) -> Self {
        self.max_delay_ms = u64::MAX;
        self
    }

    /// Total number of attempts, first try included
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `attempt` (1-based); zero for the first try
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_ms = if attempt == 0 {
            0
        } else {
            let exponential =
                self.base_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);
            // `as` saturates for out-of-range floats
            (exponential as u64).min(self.max_delay_ms)
        };

        Duration::from_millis(delay_ms)
    }
}

/// Execute an operation with retry logic and exponential backoff
///
/// # Arguments
///
/// * `config` - Retry configuration
/// * `operation` - Async operation to retry
///
/// # Returns
///
/// Returns `Ok(T)` on success, or the last error if all retries fail
///
/// # Example
///
/// ```no_run
/// use portalwatch::utils::retry::{with_retry, RetryConfig};
///
/// async fn ping() -> Result<String, std::io::Error> {
///     Ok("pong".to_string())
/// }
///
/// #[tokio::main]
/// async fn main() -> Result<(), std::io::Error> {
///     let config = RetryConfig::default();
///     let reply = with_retry(&config, || async { ping().await }).await?;
///     assert_eq!(reply, "pong");
///     Ok(())
/// }
/// ```
pub async fn with_retry<T, E, F, Fut>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    E: Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;

    loop {
        // Apply exponential backoff for retries
        if attempt > 0 {
            let delay = config.calculate_delay(attempt);
            debug!(
                attempt = attempt,
                delay_ms = duration_millis(delay),
                "Retrying operation after delay"
            );
            tokio::time::sleep(delay).await;
        }

        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(attempt = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => {
                warn!(
                    attempt = attempt + 1,
                    max_attempts = config.max_attempts(),
                    error = %e,
                    "Operation failed"
                );
                if attempt >= config.max_retries {
                    return Err(e);
                }
            }
        }

        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_retry_success_first_attempt() {
        let config = RetryConfig::new(3);
        let result = with_retry(&config, || async { Ok::<_, String>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success_after_failures() {
        let config = RetryConfig::new(3);
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result = with_retry(&config, move || {
            let attempts = Arc::clone(&attempts_clone);
            async move {
                let count = attempts.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    return Err("Simulated failure".to_string());
                }
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted() {
        let config = RetryConfig::new(2);
        let attempts = AtomicU32::new(0);
        let result: Result<(), String> = with_retry(&config, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err("Permanent failure".to_string()) }
        })
        .await;

        assert_eq!(result.unwrap_err(), "Permanent failure");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_sleeps_between_attempts() {
        let config = RetryConfig::attempts(3).uncapped();
        let start = tokio::time::Instant::now();
        let _: Result<(), String> =
            with_retry(&config, || async { Err("down".to_string()) }).await;

        // 1s + 2s, nothing after the last attempt
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[test]
    fn test_calculate_delay() {
        let config = RetryConfig::default();

        assert_eq!(config.calculate_delay(0), Duration::from_millis(0));
        assert_eq!(config.calculate_delay(1), Duration::from_millis(1000));
        assert_eq!(config.calculate_delay(2), Duration::from_millis(2000));
        assert_eq!(config.calculate_delay(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_max_delay_cap() {
        let config = RetryConfig {
            max_delay_ms: 5000,
            ..RetryConfig::new(10)
        };

        // Should not exceed max_delay_ms
        assert_eq!(config.calculate_delay(10), Duration::from_millis(5000));
    }

    #[test]
    fn test_attempts_constructor() {
        assert_eq!(RetryConfig::attempts(3).max_retries, 2);
        assert_eq!(RetryConfig::attempts(0).max_attempts(), 1);
        assert_eq!(
            RetryConfig::attempts(8).uncapped().calculate_delay(7),
            Duration::from_secs(64)
        );
    }
}
