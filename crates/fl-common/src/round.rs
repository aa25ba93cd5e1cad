//! Round record: the immutable, append-only unit of training history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a completed (or abandoned) round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Complete,
    AbortedByPolicy,
    FailedRound,
}

impl RoundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundStatus::Complete => "complete",
            RoundStatus::AbortedByPolicy => "aborted_by_policy",
            RoundStatus::FailedRound => "failed_round",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "complete" => Some(RoundStatus::Complete),
            "aborted_by_policy" => Some(RoundStatus::AbortedByPolicy),
            "failed_round" => Some(RoundStatus::FailedRound),
            _ => None,
        }
    }
}

/// Wall-clock timing breakdown for a single round, all in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Durations {
    pub total: f64,
    pub aggregation: f64,
    pub evaluation: f64,
    pub avg_client_train: f64,
    pub avg_client_eval: f64,
}

impl Default for Durations {
    fn default() -> Self {
        Self {
            total: 0.0,
            aggregation: 0.0,
            evaluation: 0.0,
            avg_client_train: 0.0,
            avg_client_eval: 0.0,
        }
    }
}

/// Client participation counts for a round; `successful + failed == total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ClientCounts {
    pub successful: u32,
    pub failed: u32,
    pub total: u32,
}

/// A single, append-only record of a completed training round.
///
/// `round_number` is the natural key: the store upserts on it, so
/// constructing and storing the same number twice replaces the record
/// rather than duplicating it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round_number: u64,
    pub status: RoundStatus,
    pub timestamp: DateTime<Utc>,
    pub accuracy: f64,
    pub loss: f64,
    pub model_size_bytes: u64,
    pub durations: Durations,
    pub client_counts: ClientCounts,
    pub raw_metrics: serde_json::Value,
}

impl RoundRecord {
    pub fn new(round_number: u64, status: RoundStatus) -> Self {
        Self {
            round_number,
            status,
            timestamp: Utc::now(),
            accuracy: 0.0,
            loss: 0.0,
            model_size_bytes: 0,
            durations: Durations::default(),
            client_counts: ClientCounts::default(),
            raw_metrics: serde_json::Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_status_round_trips_through_strings() {
        for status in [
            RoundStatus::Complete,
            RoundStatus::AbortedByPolicy,
            RoundStatus::FailedRound,
        ] {
            assert_eq!(RoundStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RoundStatus::parse("bogus"), None);
    }

    #[test]
    fn client_counts_invariant_holds_for_constructed_records() {
        let mut record = RoundRecord::new(1, RoundStatus::Complete);
        record.client_counts = ClientCounts {
            successful: 4,
            failed: 1,
            total: 5,
        };
        assert_eq!(
            record.client_counts.successful + record.client_counts.failed,
            record.client_counts.total
        );
    }
}
