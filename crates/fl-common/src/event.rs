//! Event log entries, as surfaced through the `/events` control API endpoint
//! and held in the Coordinator's bounded ring buffer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Taxonomy of events the core emits. Kept as a closed enum (rather than a
/// free-form string) so `/events` consumers can match on it without
/// guessing spellings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    RoundCompleted,
    RoundPolicyDenied,
    TrainingPaused,
    TrainingResumed,
    TrainingStoppedByPolicy,
    PolicyVersionUpdated,
    AggregationFailed,
    ClientWarning,
    Fatal,
}

/// A single entry in the event ring buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub details: serde_json::Value,
}

impl EventRecord {
    pub fn new(event_type: EventType, details: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            details,
        }
    }
}

/// Destination for domain events raised by components that do not own the
/// event log themselves (the Strategy Engine, the Policy Client). The
/// Coordinator is the only implementor, backing it with its bounded ring
/// buffer; this keeps the event store a Coordinator responsibility while
/// letting other crates report into it without a dependency cycle.
pub trait EventSink: Send + Sync {
    fn emit(&self, event_type: EventType, details: serde_json::Value);
}
