//! Wire types for the Policy Engine HTTP boundary.

use serde::{Deserialize, Serialize};

/// The decision points the core consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyType {
    TrainingParameters,
    ServerControl,
    ClientTraining,
    ClientSelection,
    ClientEvaluation,
    ServerAggregation,
}

impl PolicyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyType::TrainingParameters => "fl_training_parameters",
            PolicyType::ServerControl => "fl_server_control",
            PolicyType::ClientTraining => "fl_client_training",
            PolicyType::ClientSelection => "fl_client_selection",
            PolicyType::ClientEvaluation => "fl_client_evaluation",
            PolicyType::ServerAggregation => "fl_server_aggregation",
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PolicyCheckRequest {
    pub policy_type: String,
    pub context: serde_json::Value,
}

/// Result of a single policy check, with the signature that must be
/// re-verified by the caller before acting on `allowed`/`parameters`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PolicyCheckResult {
    pub allowed: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub action: Option<String>,
    pub signature: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
pub struct PolicyVersionResponse {
    pub policy_version: u64,
}
