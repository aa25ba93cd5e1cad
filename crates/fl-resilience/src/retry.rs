//! Retry logic with exponential backoff and jitter.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, warn};

/// Retry configuration. Connect/read/write timeouts are configured
/// separately; this governs only the retry loop wrapping a single call.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 2000,
            max_delay_ms: 4000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("max retry attempts ({attempts}) exceeded, last error: {last_error}")]
    MaxAttemptsExceeded { attempts: u32, last_error: E },
}

impl RetryConfig {
    fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let raw = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32 - 1);
        let capped = raw.min(self.max_delay_ms as f64) as u64;
        if self.jitter_factor > 0.0 {
            let jitter_range = (capped as f64 * self.jitter_factor) as u64;
            let jitter = rand::thread_rng().gen_range(0..=jitter_range.max(1));
            capped.saturating_sub(jitter)
        } else {
            capped
        }
    }
}

/// Run `operation` up to `config.max_attempts` times, retrying only when
/// `should_retry` returns true for the error produced. Sleeps with
/// exponential backoff and jitter between attempts.
pub async fn retry<F, Fut, T, E>(
    config: &RetryConfig,
    should_retry: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= config.max_attempts || !should_retry(&error) {
                    error!(attempt, "retry exhausted: {error}");
                    return Err(RetryError::MaxAttemptsExceeded {
                        attempts: attempt,
                        last_error: error,
                    });
                }
                let delay_ms = config.delay_for_attempt(attempt);
                warn!(attempt, delay_ms, "retrying after failure: {error}");
                sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_without_retry() {
        let config = RetryConfig::default();
        let result: Result<i32, RetryError<&str>> =
            retry(&config, |_| true, || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_until_success_within_budget() {
        let config = RetryConfig {
            initial_delay_ms: 1,
            max_delay_ms: 2,
            ..Default::default()
        };
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        let result: Result<i32, RetryError<&str>> = retry(
            &config,
            |_| true,
            move || {
                let attempts = attempts_clone.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err("transient")
                    } else {
                        Ok(99)
                    }
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 99);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_retrying_when_should_retry_is_false() {
        let config = RetryConfig::default();
        let result: Result<i32, RetryError<&str>> =
            retry(&config, |_| false, || async { Err("fatal") }).await;
        assert!(matches!(
            result,
            Err(RetryError::MaxAttemptsExceeded { attempts: 1, .. })
        ));
    }

    #[tokio::test]
    async fn exhausts_max_attempts() {
        let config = RetryConfig {
            max_attempts: 2,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            ..Default::default()
        };
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        let result: Result<i32, RetryError<&str>> = retry(
            &config,
            |_| true,
            move || {
                let attempts = attempts_clone.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err("always fails")
                }
            },
        )
        .await;
        assert!(matches!(
            result,
            Err(RetryError::MaxAttemptsExceeded { attempts: 2, .. })
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
