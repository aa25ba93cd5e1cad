//! Shared domain types for the federated learning coordination core.
//!
//! Every other crate in this workspace depends on `fl-common` for the
//! round record, event log, and error types that cross component
//! boundaries, so none of them need to duplicate wire-level definitions.

pub mod error;
pub mod event;
pub mod round;
pub mod state;

pub use error::FlError;
pub use event::{EventRecord, EventSink, EventType};
pub use round::{ClientCounts, Durations, RoundRecord, RoundStatus};
pub use state::{ServerState, ServerStatus};

/// The aggregated model: a list of layers, each a flat vector of weights.
pub type Parameters = Vec<Vec<f32>>;
