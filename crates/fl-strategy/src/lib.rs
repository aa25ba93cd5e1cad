//! The round state machine: `CONFIG -> DISTRIBUTE -> AGGREGATE -> EVALUATE
//! -> DECIDE -> (loop|TERMINATE)`.

mod aggregate;
mod checkpoint;
mod client_manager;
mod engine;
mod outcome;

pub use aggregate::{all_finite, federated_average, size_bytes};
pub use checkpoint::Checkpoint;
pub use client_manager::{ClientManager, EvalOutcome, EvalResult, FitOutcome, FitResult, RoundConfig};
pub use engine::{StrategyConfig, StrategyEngine};
pub use outcome::RoundOutcome;

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fl_common::{EventSink, EventType, Parameters, ServerState};
    use fl_pause_gate::PauseGate;
    use fl_policy_client::{PolicyClient, PolicyClientConfig};
    use fl_round_store::RoundStore;
    use std::sync::{Arc, Mutex};
    use tokio::sync::RwLock;

    /// Always-allow, always-succeed client manager: one client contributes
    /// a fixed parameter tensor every round.
    struct StubClientManager {
        clients: u32,
    }

    #[async_trait]
    impl ClientManager for StubClientManager {
        async fn available_clients(&self) -> u32 {
            self.clients
        }

        async fn distribute(
            &self,
            _round_number: u64,
            parameters: &Parameters,
            _config: &RoundConfig,
        ) -> Vec<FitOutcome> {
            let base = if parameters.is_empty() {
                vec![vec![0.0, 0.0]]
            } else {
                parameters.clone()
            };
            vec![FitOutcome::Success(FitResult {
                client_id: "client-1".to_string(),
                parameters: base,
                num_examples: 10,
                duration_secs: 0.01,
                metrics: serde_json::json!({}),
            })]
        }

        async fn distribute_eval(
            &self,
            _round_number: u64,
            _parameters: &Parameters,
            _config: &RoundConfig,
        ) -> Vec<EvalOutcome> {
            vec![EvalOutcome::Success(EvalResult {
                client_id: "client-1".to_string(),
                accuracy: 0.9,
                loss: 0.1,
                num_examples: 10,
                duration_secs: 0.01,
            })]
        }
    }

    struct RecordingEventSink {
        events: Mutex<Vec<EventType>>,
    }

    impl RecordingEventSink {
        fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }
    }

    impl EventSink for RecordingEventSink {
        fn emit(&self, event_type: EventType, _details: serde_json::Value) {
            self.events.lock().unwrap().push(event_type);
        }
    }

    async fn spawn_allow_all_policy_engine() -> String {
        use axum::{routing::post, Json, Router};

        let app = Router::new().route(
            "/api/v1/check",
            post(|Json(req): Json<fl_policy_client::PolicyCheckRequest>| async move {
                Json(fl_policy_client::PolicyCheckResult {
                    allowed: true,
                    reason: "ok".to_string(),
                    parameters: serde_json::Map::new(),
                    action: None,
                    signature: req
                        .context
                        .get("signature")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    timestamp: chrono::Utc::now(),
                })
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn build_engine(max_rounds: u64, clients: u32) -> (StrategyEngine, Arc<RwLock<ServerState>>) {
        let base_url = spawn_allow_all_policy_engine().await;
        let policy = PolicyClient::new(PolicyClientConfig {
            base_url,
            ..Default::default()
        });
        let store = RoundStore::open_in_memory().await.unwrap();
        let state = Arc::new(RwLock::new(ServerState::new(max_rounds)));
        let dir = tempfile::tempdir().unwrap().into_path();
        let checkpoint_path = dir.join("checkpoint.json").to_str().unwrap().to_string();

        let engine = StrategyEngine::new(
            StrategyConfig {
                min_clients: 1,
                min_available_clients: 1,
                model: "m".to_string(),
                dataset: "d".to_string(),
                checkpoint_path,
            },
            policy,
            PauseGate::new(),
            store,
            Arc::new(StubClientManager { clients }),
            state.clone(),
            Arc::new(RecordingEventSink::new()),
        );
        (engine, state)
    }

    #[tokio::test]
    async fn happy_path_runs_to_termination() {
        let (engine, state) = build_engine(3, 2).await;
        let outcome = engine.run().await;
        assert!(matches!(outcome, RoundOutcome::Terminate));
        assert_eq!(state.read().await.current_round, 3);
    }

    #[tokio::test]
    async fn single_round_advances_current_round_by_one() {
        let (engine, state) = build_engine(5, 2).await;
        let outcome = engine.run_round().await;
        assert!(matches!(outcome, RoundOutcome::Continue));
        assert_eq!(state.read().await.current_round, 1);
    }

    #[tokio::test]
    async fn too_few_available_clients_skips_without_advancing() {
        let (engine, state) = build_engine(3, 0).await;
        let outcome = engine.run_round().await;
        assert!(matches!(outcome, RoundOutcome::Continue));
        assert_eq!(state.read().await.current_round, 0);
    }

    struct AllFailClientManager;

    #[async_trait]
    impl ClientManager for AllFailClientManager {
        async fn available_clients(&self) -> u32 {
            3
        }
        async fn distribute(
            &self,
            _round_number: u64,
            _parameters: &Parameters,
            _config: &RoundConfig,
        ) -> Vec<FitOutcome> {
            vec![FitOutcome::Failed {
                client_id: "client-1".to_string(),
                reason: "training crashed".to_string(),
            }]
        }
        async fn distribute_eval(
            &self,
            _round_number: u64,
            _parameters: &Parameters,
            _config: &RoundConfig,
        ) -> Vec<EvalOutcome> {
            vec![]
        }
    }

    #[tokio::test]
    async fn zero_successful_clients_does_not_advance_or_write_a_record() {
        let base_url = spawn_allow_all_policy_engine().await;
        let policy = PolicyClient::new(PolicyClientConfig {
            base_url,
            ..Default::default()
        });
        let store = RoundStore::open_in_memory().await.unwrap();
        let state = Arc::new(RwLock::new(ServerState::new(3)));
        let dir = tempfile::tempdir().unwrap().into_path();
        let checkpoint_path = dir.join("checkpoint.json").to_str().unwrap().to_string();

        let engine = StrategyEngine::new(
            StrategyConfig {
                min_clients: 1,
                min_available_clients: 1,
                model: "m".to_string(),
                dataset: "d".to_string(),
                checkpoint_path,
            },
            policy,
            PauseGate::new(),
            store.clone(),
            Arc::new(AllFailClientManager),
            state.clone(),
            Arc::new(RecordingEventSink::new()),
        );

        let outcome = engine.run_round().await;
        assert!(matches!(outcome, RoundOutcome::Continue));
        assert_eq!(state.read().await.current_round, 0);
        assert_eq!(store.latest_number().await.unwrap(), 0);
    }
}
