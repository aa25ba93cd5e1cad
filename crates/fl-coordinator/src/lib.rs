//! Lifecycle, control API, event log; supervises the Round Store, Policy
//! Client, Pause/Resume Gate, and Strategy Engine. A struct of `Arc`-shared
//! collaborators with a `bootstrap()` entry point that spawns background
//! tasks, including a periodic supervisor loop.

pub mod api;
pub mod event_log;
pub mod http_client_manager;

pub use event_log::EventLog;
pub use http_client_manager::HttpClientManager;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fl_common::{EventType, FlError, ServerState, ServerStatus};
use fl_config::CoordinatorConfig;
use fl_pause_gate::PauseGate;
use fl_policy_client::{PolicyClient, PolicyClientConfig, PolicyType};
use fl_round_store::RoundStore;
use fl_strategy::{ClientManager, RoundOutcome, StrategyConfig, StrategyEngine};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// How long the startup monitoring loop waits for policy to permit before
/// giving up.
const STARTUP_MONITOR_BUDGET: Duration = Duration::from_secs(5 * 60);
const STARTUP_MONITOR_INTERVAL: Duration = Duration::from_secs(30);
const STAY_ALIVE_POLL_INTERVAL: Duration = Duration::from_secs(30);
const FATAL_WATCH_INTERVAL: Duration = Duration::from_millis(500);
const POLICY_VERSION_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub enum StartupOutcome {
    Proceed,
    DeniedPermanently { reason: String },
}

/// The coordination core's top-level object: one instance per process.
/// Cheap to clone (every field is `Arc`-backed or itself cheaply
/// cloneable), so handlers and background tasks each hold their own clone.
#[derive(Clone)]
pub struct Coordinator {
    pub config: CoordinatorConfig,
    pub state: Arc<RwLock<ServerState>>,
    pub events: Arc<EventLog>,
    pub store: RoundStore,
    pub policy: PolicyClient,
    pub pause_gate: PauseGate,
    pub engine: Arc<StrategyEngine>,
    fatal: Arc<AtomicBool>,
}

/// Builds a `PolicyClient` from coordinator configuration. Exposed so
/// callers that need their own Policy Client instance (for example a
/// `ClientManager` making its own per-client policy checks) construct it
/// the same way the Coordinator does, without sharing its signature cache.
pub fn build_policy_client(config: &CoordinatorConfig) -> PolicyClient {
    PolicyClient::new(PolicyClientConfig {
        base_url: config.policy_engine_url.clone(),
        server_id: "fl-coordinator".to_string(),
        strict_mode: config.strict_policy_mode,
        timeout: Duration::from_secs(config.policy_timeout_secs),
        max_retries: config.policy_max_retries,
        retry_delay: Duration::from_millis(config.policy_retry_delay_ms),
        version_check_interval: Duration::from_secs(config.policy_version_check_interval_secs),
    })
}

impl Coordinator {
    /// Startup sequence: load config (done by the caller), open the Round
    /// Store, construct the Policy Client. Does not yet perform the
    /// startup policy check or launch any servers.
    pub async fn bootstrap(
        config: CoordinatorConfig,
        client_manager: Arc<dyn ClientManager>,
    ) -> anyhow::Result<Self> {
        let store = RoundStore::open(&config.storage_dir).await?;
        let latest = store.latest_number().await?;

        let policy = build_policy_client(&config);

        let mut state = ServerState::new(config.rounds as u64);
        state.current_round = latest;

        if let Some(checkpoint) = fl_strategy::Checkpoint::load(&config.model_checkpoint_file).await? {
            if checkpoint.model_name == config.model && checkpoint.dataset == config.dataset {
                info!(round = checkpoint.round, "restored checkpoint");
                state.current_parameters = Some(checkpoint.parameters);
            } else {
                warn!("checkpoint present but (model, dataset) tags differ, ignoring");
            }
        }

        let state = Arc::new(RwLock::new(state));
        let events = Arc::new(EventLog::new());
        let pause_gate = PauseGate::new();
        let event_sink: Arc<dyn fl_common::EventSink> = events.clone();

        let engine = Arc::new(StrategyEngine::new(
            StrategyConfig {
                min_clients: config.min_clients,
                min_available_clients: config.min_available_clients,
                model: config.model.clone(),
                dataset: config.dataset.clone(),
                checkpoint_path: config.model_checkpoint_file.clone(),
            },
            policy.clone(),
            pause_gate.clone(),
            store.clone(),
            client_manager,
            state.clone(),
            event_sink,
        ));

        Ok(Self {
            config,
            state,
            events,
            store,
            policy,
            pause_gate,
            engine,
            fatal: Arc::new(AtomicBool::new(false)),
        })
    }

    /// `fl_training_parameters` may tighten `max_rounds`, then
    /// `fl_server_control` gates whether
    /// training may begin at all. A denial enters a bounded monitoring
    /// loop rather than failing outright, so operators can start the
    /// process before its allowed time window opens.
    pub async fn startup_policy_check(&self) -> StartupOutcome {
        let params_context = serde_json::json!({"current_round": 0, "max_rounds": self.config.rounds});
        if let Ok(result) = self.policy.check(PolicyType::TrainingParameters, params_context).await {
            if let Some(total_rounds) = result.parameters.get("total_rounds").and_then(|v| v.as_u64()) {
                let mut state = self.state.write().await;
                if total_rounds < state.max_rounds {
                    state.max_rounds = total_rounds;
                }
            }
        }

        let elapsed_budget = STARTUP_MONITOR_BUDGET;
        let deadline = tokio::time::Instant::now() + elapsed_budget;
        loop {
            let (current_round, max_rounds) = {
                let state = self.state.read().await;
                (state.current_round, state.max_rounds)
            };
            let context = serde_json::json!({"current_round": current_round, "max_rounds": max_rounds});
            match self.policy.check(PolicyType::ServerControl, context).await {
                Ok(result) if result.allowed => {
                    self.state.write().await.server_status = ServerStatus::Running;
                    return StartupOutcome::Proceed;
                }
                Ok(result) => {
                    if tokio::time::Instant::now() >= deadline {
                        return StartupOutcome::DeniedPermanently { reason: result.reason };
                    }
                    info!(reason = %result.reason, "startup denied, waiting for policy window");
                    tokio::time::sleep(STARTUP_MONITOR_INTERVAL).await;
                }
                Err(e) => {
                    if self.config.strict_policy_mode {
                        return StartupOutcome::DeniedPermanently { reason: e.to_string() };
                    }
                    return StartupOutcome::Proceed;
                }
            }
        }
    }

    /// Drive the Strategy Engine to completion and fold the outcome back
    /// into Global State. Never panics: a `Fatal` outcome is recorded and
    /// flagged for `watch_for_fatal` rather than unwound here.
    pub async fn run_strategy_to_completion(&self) {
        {
            let mut state = self.state.write().await;
            state.training_active = true;
            state.server_status = ServerStatus::Running;
        }

        let outcome = self.engine.run().await;

        let mut state = self.state.write().await;
        state.training_active = false;
        match outcome {
            RoundOutcome::Terminate => {
                state.server_status = ServerStatus::Completed;
                drop(state);
                info!("training completed, max_rounds reached");
            }
            RoundOutcome::Stop { reason } => {
                state.server_status = ServerStatus::Stopped;
                drop(state);
                info!(reason, "training stopped by policy");
            }
            RoundOutcome::Fatal(e) => {
                state.server_status = ServerStatus::Error;
                drop(state);
                error!(error = %e, "strategy engine raised a fatal error");
                self.events.push(EventType::Fatal, serde_json::json!({"error": e.to_string()}));
                self.fatal.store(true, Ordering::SeqCst);
            }
            RoundOutcome::Continue => unreachable!("StrategyEngine::run only returns on Terminate/Stop/Fatal"),
        }
    }

    /// When configured (or after a policy-driven stop), periodically
    /// re-check whether policy now
    /// permits resuming and, if so, re-enter CONFIG from the current
    /// round rather than exiting.
    pub async fn stay_alive_supervisor(&self) {
        loop {
            tokio::time::sleep(STAY_ALIVE_POLL_INTERVAL).await;

            let (should_poll, restart_allowed) = {
                let state = self.state.read().await;
                let idle = !state.training_active
                    && matches!(state.server_status, ServerStatus::Completed | ServerStatus::Stopped);
                let should_poll = idle && (self.config.stay_alive_after_training || state.stopped_by_policy);
                (should_poll, state.restart_allowed())
            };

            if !should_poll || !restart_allowed {
                continue;
            }

            let (current_round, max_rounds) = {
                let state = self.state.read().await;
                (state.current_round, state.max_rounds)
            };
            let context = serde_json::json!({"current_round": current_round, "max_rounds": max_rounds, "action": "stay_alive_check"});
            match self.policy.check(PolicyType::ServerControl, context).await {
                Ok(result) if result.allowed => {
                    {
                        let mut state = self.state.write().await;
                        state.stopped_by_policy = false;
                        state.stop_reason = None;
                    }
                    self.events.push(EventType::TrainingResumed, serde_json::json!({"via": "stay_alive"}));
                    self.run_strategy_to_completion().await;
                }
                Ok(_) => continue,
                Err(e) => warn!(error = %e, "stay-alive policy poll failed, will retry"),
            }
        }
    }

    /// An unexpected fatal error exits the process with code 1. The check
    /// is polled rather than signaled so it can
    /// live in its own task without plumbing a channel through every
    /// caller of `run_strategy_to_completion`.
    pub async fn watch_for_fatal(&self) -> ! {
        loop {
            if self.fatal.load(Ordering::SeqCst) {
                error!("fatal error recorded, exiting with status 1");
                std::process::exit(1);
            }
            tokio::time::sleep(FATAL_WATCH_INTERVAL).await;
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::SeqCst)
    }

    /// Background task that periodically asks the Policy Client to
    /// check for a version bump. `PolicyClient::poll_version` already
    /// rate-limits itself to `version_check_interval`, so this loop can
    /// wake far more often than that without hammering the engine.
    pub async fn poll_policy_version(&self) -> ! {
        loop {
            tokio::time::sleep(POLICY_VERSION_POLL_INTERVAL).await;
            if let Some(new_version) = self.policy.poll_version().await {
                self.state.write().await.cached_policy_version = new_version;
                self.events.push(
                    EventType::PolicyVersionUpdated,
                    serde_json::json!({"policy_version": new_version}),
                );
            }
        }
    }
}

/// Map a transient `FlError` to a reason string safe to surface on the
/// control API: never raw `anyhow` chains, only the top-level reason.
pub fn public_reason(error: &FlError) -> String {
    error.to_string()
}
