//! Circuit breaker: stops hammering a Policy Engine that is sustained-down
//! instead of retrying into the 120s read timeout on every round.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub name: String,
    pub failure_threshold: u64,
    pub success_threshold: u64,
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "policy-engine".to_string(),
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("circuit breaker '{name}' is open, next attempt in {retry_after_ms}ms")]
pub struct CircuitBreakerOpenError {
    pub name: String,
    pub retry_after_ms: u64,
}

/// Tracks failures of a single upstream and short-circuits calls once the
/// failure threshold is crossed, matching the Closed/Open/HalfOpen cycle.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: AtomicU8,
    failure_count: AtomicU64,
    success_count: AtomicU64,
    next_attempt: Arc<RwLock<Instant>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(0),
            failure_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            next_attempt: Arc::new(RwLock::new(Instant::now())),
        }
    }

    pub fn state(&self) -> CircuitState {
        match self.state.load(Ordering::Relaxed) {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }

    /// Returns `Err` immediately if the circuit is open and the reset
    /// timeout hasn't elapsed; otherwise runs `operation`, scoring the
    /// outcome, and returns the result.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        if self.state() == CircuitState::Open {
            let next_attempt = *self.next_attempt.read().await;
            if Instant::now() < next_attempt {
                return Err(CallError::Open(CircuitBreakerOpenError {
                    name: self.config.name.clone(),
                    retry_after_ms: next_attempt.duration_since(Instant::now()).as_millis() as u64,
                }));
            }
            self.state.store(2, Ordering::Relaxed);
            self.success_count.store(0, Ordering::Relaxed);
        }

        match operation().await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(error) => {
                self.on_failure().await;
                Err(CallError::Failed(error))
            }
        }
    }

    async fn on_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
        if self.state() == CircuitState::HalfOpen {
            let successes = self.success_count.fetch_add(1, Ordering::Relaxed) + 1;
            if successes >= self.config.success_threshold {
                self.state.store(0, Ordering::Relaxed);
                self.success_count.store(0, Ordering::Relaxed);
                info!(circuit = %self.config.name, "circuit breaker closed");
            }
        }
    }

    async fn on_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        if self.state() == CircuitState::HalfOpen || failures >= self.config.failure_threshold {
            self.state.store(1, Ordering::Relaxed);
            *self.next_attempt.write().await =
                Instant::now() + Duration::from_millis(self.config.reset_timeout_ms);
            self.success_count.store(0, Ordering::Relaxed);
            warn!(circuit = %self.config.name, failures, "circuit breaker opened");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CallError<E> {
    #[error(transparent)]
    Open(CircuitBreakerOpenError),
    #[error("operation failed: {0}")]
    Failed(E),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_failure_threshold_and_rejects_fast() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            reset_timeout_ms: 60_000,
            ..Default::default()
        });

        for _ in 0..2 {
            let result: Result<(), CallError<&str>> =
                breaker.call(|| async { Err("boom") }).await;
            assert!(matches!(result, Err(CallError::Failed(_))));
        }

        assert_eq!(breaker.state(), CircuitState::Open);
        let result: Result<(), CallError<&str>> = breaker.call(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(CallError::Open(_))));
    }

    #[tokio::test]
    async fn closes_again_after_reset_timeout_and_successes() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            name: "test".to_string(),
            failure_threshold: 1,
            success_threshold: 1,
            reset_timeout_ms: 1,
        });

        let _: Result<(), CallError<&str>> = breaker.call(|| async { Err("boom") }).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(5)).await;

        let result: Result<i32, CallError<&str>> = breaker.call(|| async { Ok(1) }).await;
        assert!(result.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
