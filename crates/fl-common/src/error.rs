//! Error taxonomy shared across the coordination core.
//!
//! Library-facing code matches on `FlError` variants; orchestration code
//! (the Coordinator's startup sequence, the Strategy Engine's round loop)
//! mostly propagates these via `anyhow::Result` and only inspects the
//! variant at the points where behavior actually differs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlError {
    #[error("policy engine unreachable after retries: {0}")]
    PolicyUnavailable(String),

    #[error("policy denied {policy_type}: {reason}")]
    PolicyDenied { policy_type: String, reason: String },

    #[error("policy signature invalid or expired: {0}")]
    SignatureInvalid(String),

    #[error("round store persistence error: {0}")]
    Storage(String),

    #[error("aggregation failed: {0}")]
    AggregationFailed(String),

    #[error("training stopped by policy: {reason}")]
    StoppedByPolicy { reason: String },

    #[error("illegal state transition: {0}")]
    IllegalTransition(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("fatal error: {0}")]
    Fatal(String),
}
