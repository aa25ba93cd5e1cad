//! The Client Manager boundary: the FL framework's own wire protocol to
//! trainers is out of scope; this core only depends on the abstract
//! operations below, supplied by the embedder.

use async_trait::async_trait;
use fl_common::Parameters;
use serde::{Deserialize, Serialize};

/// Per-round config handed to clients. `total_rounds` is advisory and may
/// have been narrowed by a `fl_training_parameters` check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundConfig {
    pub learning_rate: f32,
    pub batch_size: u32,
    pub local_epochs: u32,
    pub momentum: f32,
    pub total_rounds: Option<u32>,
    pub test_size: f32,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            batch_size: 32,
            local_epochs: 1,
            momentum: 0.9,
            total_rounds: None,
            test_size: 0.2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FitResult {
    pub client_id: String,
    pub parameters: Parameters,
    pub num_examples: i64,
    pub duration_secs: f64,
    pub metrics: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct EvalResult {
    pub client_id: String,
    pub accuracy: f64,
    pub loss: f64,
    pub num_examples: i64,
    pub duration_secs: f64,
}

/// One client's outcome for a fit (training) round. Per-client aggregation
/// veto is applied by the Client Manager itself before a contribution
/// ever reaches this enum, so `Success` here always means "eligible to
/// aggregate".
#[derive(Debug, Clone)]
pub enum FitOutcome {
    Success(FitResult),
    Failed { client_id: String, reason: String },
}

#[derive(Debug, Clone)]
pub enum EvalOutcome {
    Success(EvalResult),
    Failed { client_id: String, reason: String },
}

/// External collaborator abstraction: selects and talks to clients during
/// the distribute phase. The core neither knows nor cares whether clients are
/// real trainers or simulators.
#[async_trait]
pub trait ClientManager: Send + Sync {
    /// Number of clients currently reachable, honoring `min_clients` /
    /// `min_available_clients` is the caller's responsibility.
    async fn available_clients(&self) -> u32;

    async fn distribute(
        &self,
        round_number: u64,
        parameters: &Parameters,
        config: &RoundConfig,
    ) -> Vec<FitOutcome>;

    async fn distribute_eval(
        &self,
        round_number: u64,
        parameters: &Parameters,
        config: &RoundConfig,
    ) -> Vec<EvalOutcome>;
}
