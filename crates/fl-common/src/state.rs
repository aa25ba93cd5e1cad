//! Global Server State: the single process-wide snapshot of where a
//! training run stands. Owned by the Coordinator behind an
//! `Arc<tokio::sync::RwLock<ServerState>>`; the Strategy Engine mutates it
//! at round boundaries, the control API reads a cloned snapshot so it
//! never blocks the Strategy task.

use serde::{Deserialize, Serialize};

use crate::Parameters;

/// Coarse status surfaced on `/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Starting,
    Running,
    Paused,
    Stopped,
    Completed,
    Error,
}

/// Process-wide training state. `current_parameters` is excluded from
/// `Serialize` because `/metrics` and `/status` never expose the raw model
/// blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerState {
    pub current_round: u64,
    pub max_rounds: u64,
    pub training_active: bool,
    pub training_paused: bool,
    pub pause_reason: Option<String>,
    pub stopped_by_policy: bool,
    pub stop_reason: Option<String>,
    pub connected_clients: u32,
    pub last_accuracy: f64,
    pub last_loss: f64,
    pub cached_policy_version: u64,
    #[serde(skip)]
    pub current_parameters: Option<Parameters>,
    pub server_status: ServerStatus,
}

impl ServerState {
    pub fn new(max_rounds: u64) -> Self {
        Self {
            current_round: 0,
            max_rounds,
            training_active: false,
            training_paused: false,
            pause_reason: None,
            stopped_by_policy: false,
            stop_reason: None,
            connected_clients: 0,
            last_accuracy: 0.0,
            last_loss: 0.0,
            cached_policy_version: 0,
            current_parameters: None,
            server_status: ServerStatus::Starting,
        }
    }

    /// Whether a `/restart` request is permitted: stopped by policy, or
    /// idle with rounds remaining. The caller is still responsible for the
    /// policy restart check itself.
    pub fn restart_allowed(&self) -> bool {
        self.stopped_by_policy || (!self.training_active && self.current_round < self.max_rounds)
    }
}
