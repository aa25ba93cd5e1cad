//! The round state machine: `CONFIG -> DISTRIBUTE -> AGGREGATE -> EVALUATE
//! -> DECIDE -> (loop|TERMINATE)`. A struct holding `Arc<RwLock<...>>`
//! shared state plus collaborator handles, with one `tokio::spawn`-friendly
//! entry point driving the explicit phases below.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Datelike, Timelike, Utc};
use fl_common::{ClientCounts, Durations, EventSink, EventType, FlError, Parameters, RoundRecord, RoundStatus, ServerState, ServerStatus};
use fl_pause_gate::PauseGate;
use fl_policy_client::{PolicyClient, PolicyType};
use fl_round_store::RoundStore;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::aggregate::{all_finite, federated_average, size_bytes};
use crate::client_manager::{ClientManager, EvalOutcome, FitOutcome, RoundConfig};
use crate::outcome::RoundOutcome;

const POLICY_RECHECK_DELAY: Duration = Duration::from_secs(10);

/// The subset of the Coordinator's configuration the Strategy Engine
/// actually needs; deliberately narrower than `fl-config`'s
/// `CoordinatorConfig` so this crate doesn't depend on HTTP/control-plane
/// configuration it never reads.
#[derive(Debug, Clone)]
pub struct StrategyConfig {
    pub min_clients: u32,
    pub min_available_clients: u32,
    pub model: String,
    pub dataset: String,
    pub checkpoint_path: String,
}

enum ConfigPhaseResult {
    Proceed {
        available_clients: u32,
        round_config: RoundConfig,
    },
    Skip,
}

enum AggregatePhaseResult {
    ZeroSuccessful,
    NonFinite,
    Ok {
        aggregated: Parameters,
        client_counts: ClientCounts,
        aggregation_duration: f64,
        avg_client_train: f64,
    },
}

pub struct StrategyEngine {
    config: StrategyConfig,
    policy: PolicyClient,
    pause_gate: PauseGate,
    store: RoundStore,
    client_manager: Arc<dyn ClientManager>,
    state: Arc<RwLock<ServerState>>,
    events: Arc<dyn EventSink>,
}

impl StrategyEngine {
    pub fn new(
        config: StrategyConfig,
        policy: PolicyClient,
        pause_gate: PauseGate,
        store: RoundStore,
        client_manager: Arc<dyn ClientManager>,
        state: Arc<RwLock<ServerState>>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            policy,
            pause_gate,
            store,
            client_manager,
            state,
            events,
        }
    }

    /// Run rounds until `Terminate`, `Stop`, or `Fatal`. Each `Continue`
    /// (including a skipped round) immediately attempts the next round.
    pub async fn run(&self) -> RoundOutcome {
        loop {
            match self.run_round().await {
                RoundOutcome::Continue => continue,
                other => return other,
            }
        }
    }

    /// Execute a single pass of CONFIG -> DISTRIBUTE -> AGGREGATE ->
    /// EVALUATE -> DECIDE.
    pub async fn run_round(&self) -> RoundOutcome {
        self.pause_gate.wait_if_paused("config").await;

        {
            let state = self.state.read().await;
            if state.stopped_by_policy {
                return RoundOutcome::Stop {
                    reason: state.stop_reason.clone().unwrap_or_default(),
                };
            }
        }

        let (available_clients, round_config) = match self.config_phase().await {
            Ok(ConfigPhaseResult::Skip) => return RoundOutcome::Continue,
            Ok(ConfigPhaseResult::Proceed {
                available_clients,
                round_config,
            }) => (available_clients, round_config),
            Err(FlError::StoppedByPolicy { reason }) => {
                self.apply_stop(reason.clone()).await;
                return RoundOutcome::Stop { reason };
            }
            Err(e) => return RoundOutcome::Fatal(e),
        };

        if available_clients < self.config.min_clients {
            warn!(available_clients, min_clients = self.config.min_clients, "not enough clients, skipping round");
            return RoundOutcome::Continue;
        }

        if available_clients < self.config.min_available_clients {
            warn!(
                available_clients,
                min_available_clients = self.config.min_available_clients,
                "not enough available clients, skipping round"
            );
            return RoundOutcome::Continue;
        }

        let round_start = Instant::now();
        let round_number = { self.state.read().await.current_round + 1 };

        let current_parameters = {
            self.state
                .read()
                .await
                .current_parameters
                .clone()
                .unwrap_or_default()
        };

        let fit_outcomes = self
            .client_manager
            .distribute(round_number, &current_parameters, &round_config)
            .await;

        match self.aggregate_phase(&fit_outcomes) {
            AggregatePhaseResult::ZeroSuccessful => {
                self.events.emit(
                    EventType::AggregationFailed,
                    serde_json::json!({"round_number": round_number, "reason": "zero successful clients"}),
                );
                warn!(round_number, "zero successful clients, round produced no record");
                return RoundOutcome::Continue;
            }
            AggregatePhaseResult::NonFinite => {
                let error = FlError::AggregationFailed(format!(
                    "round {round_number} produced non-finite aggregated parameters"
                ));
                self.events.emit(
                    EventType::AggregationFailed,
                    serde_json::json!({"round_number": round_number, "reason": "non_finite_parameters"}),
                );
                return RoundOutcome::Fatal(error);
            }
            AggregatePhaseResult::Ok {
                aggregated,
                client_counts,
                aggregation_duration,
                avg_client_train,
            } => {
                self.state.write().await.current_parameters = Some(aggregated.clone());

                let eval_outcomes = self
                    .client_manager
                    .distribute_eval(round_number, &aggregated, &round_config)
                    .await;
                let (accuracy, loss, avg_client_eval, evaluation_duration, any_evaluators) =
                    self.evaluate_phase(&eval_outcomes);

                self.decide_phase(
                    round_number,
                    aggregated,
                    accuracy,
                    loss,
                    any_evaluators,
                    client_counts,
                    Durations {
                        total: round_start.elapsed().as_secs_f64(),
                        aggregation: aggregation_duration,
                        evaluation: evaluation_duration,
                        avg_client_train,
                        avg_client_eval,
                    },
                )
                .await
            }
        }
    }

    /// CONFIG: pause/stop gating, time-fresh policy context, the
    /// `fl_client_training` recheck loop, and `fl_client_selection`.
    async fn config_phase(&self) -> Result<ConfigPhaseResult, FlError> {
        let training_result = loop {
            let available_clients = self.client_manager.available_clients().await;
            let context = self.build_context(available_clients).await;

            let result = self
                .policy
                .check(PolicyType::ClientTraining, context)
                .await
                .map_err(|e| FlError::PolicyUnavailable(e.to_string()))?;

            if result.allowed {
                break result;
            }

            self.pause_gate.pause(result.reason.clone()).await;
            self.events.emit(
                EventType::TrainingPaused,
                serde_json::json!({"reason": result.reason}),
            );
            sleep(POLICY_RECHECK_DELAY).await;
        };

        if self.pause_gate.is_paused() {
            self.pause_gate.resume("policy now allows client training").await;
            self.events.emit(EventType::TrainingResumed, serde_json::json!({}));
        }

        let available_clients = self.client_manager.available_clients().await;
        let context = self.build_context(available_clients).await;
        let selection = self
            .policy
            .check(PolicyType::ClientSelection, context)
            .await
            .map_err(|e| FlError::PolicyUnavailable(e.to_string()))?;

        if !selection.allowed {
            self.events.emit(
                EventType::RoundPolicyDenied,
                serde_json::json!({"policy_type": "fl_client_selection", "reason": selection.reason}),
            );
            if selection.action.as_deref() == Some("stop_training") {
                return Err(FlError::StoppedByPolicy {
                    reason: selection.reason,
                });
            }
            return Ok(ConfigPhaseResult::Skip);
        }

        let mut round_config = RoundConfig::default();
        apply_overrides(&mut round_config, &training_result.parameters);

        Ok(ConfigPhaseResult::Proceed {
            available_clients,
            round_config,
        })
    }

    fn aggregate_phase(&self, fit_outcomes: &[FitOutcome]) -> AggregatePhaseResult {
        let aggregation_start = Instant::now();
        let mut contributions = Vec::new();
        let mut successful = 0u32;
        let mut failed = 0u32;
        let mut train_durations = Vec::new();

        for outcome in fit_outcomes {
            match outcome {
                FitOutcome::Success(fit) => {
                    let num_examples = if fit.num_examples <= 0 {
                        self.events.emit(
                            EventType::ClientWarning,
                            serde_json::json!({"client_id": fit.client_id, "reason": "num_examples <= 0, clamped to 1"}),
                        );
                        1
                    } else {
                        fit.num_examples
                    };
                    contributions.push((fit.parameters.clone(), num_examples as f64));
                    train_durations.push(fit.duration_secs);
                    successful += 1;
                }
                FitOutcome::Failed { .. } => failed += 1,
            }
        }

        if successful == 0 {
            return AggregatePhaseResult::ZeroSuccessful;
        }

        let aggregated = match federated_average(&contributions) {
            Some(parameters) => parameters,
            None => return AggregatePhaseResult::ZeroSuccessful,
        };

        if !all_finite(&aggregated) {
            return AggregatePhaseResult::NonFinite;
        }

        let avg_client_train = if train_durations.is_empty() {
            0.0
        } else {
            train_durations.iter().sum::<f64>() / train_durations.len() as f64
        };

        AggregatePhaseResult::Ok {
            aggregated,
            client_counts: ClientCounts {
                successful,
                failed,
                total: successful + failed,
            },
            aggregation_duration: aggregation_start.elapsed().as_secs_f64(),
            avg_client_train,
        }
    }

    /// EVALUATE: weighted accuracy/loss means over successful evaluators.
    /// Zero successful evaluators is not an abort condition;
    /// it yields `accuracy = loss = 0.0` and the round still advances,
    /// recorded with `status = failed_round` (DECIDE).
    fn evaluate_phase(&self, eval_outcomes: &[EvalOutcome]) -> (f64, f64, f64, f64, bool) {
        let evaluation_start = Instant::now();
        let mut total_weight = 0.0;
        let mut weighted_accuracy = 0.0;
        let mut weighted_loss = 0.0;
        let mut eval_durations = Vec::new();

        for outcome in eval_outcomes {
            if let EvalOutcome::Success(eval) = outcome {
                let weight = eval.num_examples.max(1) as f64;
                weighted_accuracy += eval.accuracy * weight;
                weighted_loss += eval.loss * weight;
                total_weight += weight;
                eval_durations.push(eval.duration_secs);
            }
        }

        let avg_client_eval = if eval_durations.is_empty() {
            0.0
        } else {
            eval_durations.iter().sum::<f64>() / eval_durations.len() as f64
        };

        if total_weight <= 0.0 {
            return (0.0, 0.0, avg_client_eval, evaluation_start.elapsed().as_secs_f64(), false);
        }

        (
            weighted_accuracy / total_weight,
            weighted_loss / total_weight,
            avg_client_eval,
            evaluation_start.elapsed().as_secs_f64(),
            true,
        )
    }

    /// DECIDE: `fl_server_control` check, record write, state update,
    /// checkpoint, and the loop/terminate/stop decision.
    #[allow(clippy::too_many_arguments)]
    async fn decide_phase(
        &self,
        round_number: u64,
        aggregated: Parameters,
        accuracy: f64,
        loss: f64,
        any_evaluators: bool,
        client_counts: ClientCounts,
        durations: Durations,
    ) -> RoundOutcome {
        let (last_accuracy, max_rounds) = {
            let state = self.state.read().await;
            (state.last_accuracy, state.max_rounds)
        };

        let context = serde_json::json!({
            "current_round": round_number,
            "max_rounds": max_rounds,
            "accuracy": accuracy,
            "loss": loss,
            "accuracy_improvement": accuracy - last_accuracy,
            "successful_clients": client_counts.successful,
            "failed_clients": client_counts.failed,
        });

        let decision = match self.policy.check(PolicyType::ServerControl, context).await {
            Ok(result) => result,
            Err(e) => return RoundOutcome::Fatal(FlError::PolicyUnavailable(e.to_string())),
        };

        let status = if any_evaluators {
            RoundStatus::Complete
        } else {
            RoundStatus::FailedRound
        };

        let mut record = RoundRecord::new(round_number, status);
        record.accuracy = accuracy;
        record.loss = loss;
        record.model_size_bytes = size_bytes(&aggregated);
        record.durations = durations;
        record.client_counts = client_counts;

        if let Err(e) = self.store.store(&record).await {
            return RoundOutcome::Fatal(FlError::Storage(e.to_string()));
        }

        if let Some(new_max) = decision.parameters.get("max_rounds").and_then(Value::as_u64) {
            let mut state = self.state.write().await;
            if new_max < state.max_rounds {
                state.max_rounds = new_max;
            }
        }

        {
            let mut state = self.state.write().await;
            state.current_round = round_number;
            state.last_accuracy = accuracy;
            state.last_loss = loss;
        }

        let checkpoint = crate::checkpoint::Checkpoint {
            parameters: aggregated,
            round: round_number,
            timestamp: Utc::now(),
            model_name: self.config.model.clone(),
            dataset: self.config.dataset.clone(),
        };
        if let Err(e) = checkpoint.save(&self.config.checkpoint_path).await {
            warn!(error = %e, "failed to persist checkpoint, continuing");
        }

        if !decision.allowed {
            self.apply_stop(decision.reason.clone()).await;
            self.events.emit(
                EventType::TrainingStoppedByPolicy,
                serde_json::json!({"reason": decision.reason, "round_number": round_number}),
            );
            return RoundOutcome::Stop {
                reason: decision.reason,
            };
        }

        self.events.emit(
            EventType::RoundCompleted,
            serde_json::json!({"round_number": round_number, "accuracy": accuracy, "loss": loss}),
        );

        let (current_round, max_rounds) = {
            let state = self.state.read().await;
            (state.current_round, state.max_rounds)
        };
        if current_round >= max_rounds {
            self.state.write().await.server_status = ServerStatus::Completed;
            RoundOutcome::Terminate
        } else {
            RoundOutcome::Continue
        }
    }

    async fn apply_stop(&self, reason: String) {
        let mut state = self.state.write().await;
        state.stopped_by_policy = true;
        state.stop_reason = Some(reason);
        state.training_active = false;
        state.server_status = ServerStatus::Stopped;
    }

    async fn build_context(&self, available_clients: u32) -> Value {
        let now = Utc::now();
        let current_round = self.state.read().await.current_round;
        serde_json::json!({
            "hour": now.hour(),
            "minute": now.minute(),
            "day_of_week": now.weekday().num_days_from_monday(),
            "timestamp": now.to_rfc3339(),
            "current_round": current_round,
            "available_clients": available_clients,
            "min_clients": self.config.min_clients,
            "min_available_clients": self.config.min_available_clients,
            "model": self.config.model,
            "dataset": self.config.dataset,
        })
    }
}

fn apply_overrides(round_config: &mut RoundConfig, parameters: &serde_json::Map<String, Value>) {
    if let Some(v) = parameters.get("learning_rate").and_then(Value::as_f64) {
        round_config.learning_rate = v as f32;
    }
    if let Some(v) = parameters.get("batch_size").and_then(Value::as_u64) {
        round_config.batch_size = v as u32;
    }
    if let Some(v) = parameters.get("local_epochs").and_then(Value::as_u64) {
        round_config.local_epochs = v as u32;
    }
    if let Some(v) = parameters.get("momentum").and_then(Value::as_f64) {
        round_config.momentum = v as f32;
    }
    if let Some(v) = parameters.get("total_rounds").and_then(Value::as_u64) {
        round_config.total_rounds = Some(v as u32);
    }
    if let Some(v) = parameters.get("test_size").and_then(Value::as_f64) {
        round_config.test_size = v as f32;
    }
}
