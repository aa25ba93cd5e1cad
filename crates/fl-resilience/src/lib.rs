//! Resilience primitives shared by outbound calls to the Policy Engine.
//!
//! Circuit breaker and retry executor, trimmed to what the policy client
//! actually needs.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{CallError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerOpenError, CircuitState};
pub use retry::{retry, RetryConfig, RetryError};
