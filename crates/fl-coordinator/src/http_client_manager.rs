//! A concrete `ClientManager`: POSTs fit/evaluate requests to a fixed list
//! of client endpoints. The wire format is this core's own concern, shaped
//! like a task-execution request/response pair adapted from "run a task"
//! to "fit/evaluate a model".

use async_trait::async_trait;
use fl_common::Parameters;
use fl_policy_client::{PolicyClient, PolicyType};
use fl_strategy::{ClientManager, EvalOutcome, EvalResult, FitOutcome, FitResult, RoundConfig};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::warn;

#[derive(Debug, Serialize)]
struct FitRequest<'a> {
    round_number: u64,
    parameters: &'a Parameters,
    config: &'a RoundConfig,
}

#[derive(Debug, Deserialize)]
struct FitResponse {
    parameters: Parameters,
    num_examples: i64,
    #[serde(default)]
    metrics: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct EvalRequest<'a> {
    round_number: u64,
    parameters: &'a Parameters,
    config: &'a RoundConfig,
}

#[derive(Debug, Deserialize)]
struct EvalResponse {
    accuracy: f64,
    loss: f64,
    num_examples: i64,
}

/// Talks to a fixed set of client base URLs (`{url}/fit`, `{url}/evaluate`).
/// Client discovery/registration is out of this core's scope; the URL
/// list is supplied at construction by the embedder.
///
/// Performs the two per-client decision points itself: `fl_server_aggregation`
/// vetoes a client's fit result before it is handed back as eligible for
/// aggregation, and `fl_client_evaluation` gates whether a client is asked
/// to evaluate at all.
pub struct HttpClientManager {
    http: reqwest::Client,
    client_urls: Vec<String>,
    policy: PolicyClient,
}

impl HttpClientManager {
    pub fn new(client_urls: Vec<String>, policy: PolicyClient) -> Self {
        Self {
            http: reqwest::Client::new(),
            client_urls,
            policy,
        }
    }

    /// Vetoes a successful fit result via `fl_server_aggregation` before
    /// it is handed back as eligible for aggregation.
    async fn apply_aggregation_veto(&self, round_number: u64, outcome: FitOutcome) -> FitOutcome {
        let fit = match outcome {
            FitOutcome::Success(fit) => fit,
            failed => return failed,
        };
        let context = serde_json::json!({
            "round_number": round_number,
            "client_id": fit.client_id,
            "num_examples": fit.num_examples,
        });
        match self.policy.check(PolicyType::ServerAggregation, context).await {
            Ok(result) if result.allowed => FitOutcome::Success(fit),
            Ok(result) => FitOutcome::Failed {
                client_id: fit.client_id,
                reason: result.reason,
            },
            Err(e) => {
                warn!(client = %fit.client_id, error = %e, "fl_server_aggregation check failed, excluding client");
                FitOutcome::Failed {
                    client_id: fit.client_id,
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[async_trait]
impl ClientManager for HttpClientManager {
    async fn available_clients(&self) -> u32 {
        self.client_urls.len() as u32
    }

    async fn distribute(
        &self,
        round_number: u64,
        parameters: &Parameters,
        config: &RoundConfig,
    ) -> Vec<FitOutcome> {
        let mut outcomes = Vec::with_capacity(self.client_urls.len());
        for url in &self.client_urls {
            let started = Instant::now();
            let request = FitRequest {
                round_number,
                parameters,
                config,
            };
            let outcome = match self.http.post(format!("{url}/fit")).json(&request).send().await {
                Ok(response) => match response.error_for_status() {
                    Ok(response) => match response.json::<FitResponse>().await {
                        Ok(body) => FitOutcome::Success(FitResult {
                            client_id: url.clone(),
                            parameters: body.parameters,
                            num_examples: body.num_examples,
                            duration_secs: started.elapsed().as_secs_f64(),
                            metrics: body.metrics,
                        }),
                        Err(e) => FitOutcome::Failed {
                            client_id: url.clone(),
                            reason: e.to_string(),
                        },
                    },
                    Err(e) => FitOutcome::Failed {
                        client_id: url.clone(),
                        reason: e.to_string(),
                    },
                },
                Err(e) => {
                    warn!(client = %url, error = %e, "client unreachable for fit");
                    FitOutcome::Failed {
                        client_id: url.clone(),
                        reason: e.to_string(),
                    }
                }
            };
            outcomes.push(self.apply_aggregation_veto(round_number, outcome).await);
        }
        outcomes
    }

    async fn distribute_eval(
        &self,
        round_number: u64,
        parameters: &Parameters,
        config: &RoundConfig,
    ) -> Vec<EvalOutcome> {
        let mut outcomes = Vec::with_capacity(self.client_urls.len());
        for url in &self.client_urls {
            let context = serde_json::json!({
                "round_number": round_number,
                "client_id": url,
            });
            let evaluation_allowed = match self.policy.check(PolicyType::ClientEvaluation, context).await {
                Ok(result) => result.allowed,
                Err(e) => {
                    warn!(client = %url, error = %e, "fl_client_evaluation check failed, excluding client");
                    false
                }
            };
            if !evaluation_allowed {
                outcomes.push(EvalOutcome::Failed {
                    client_id: url.clone(),
                    reason: "denied by fl_client_evaluation policy".to_string(),
                });
                continue;
            }

            let started = Instant::now();
            let request = EvalRequest {
                round_number,
                parameters,
                config,
            };
            let outcome = match self
                .http
                .post(format!("{url}/evaluate"))
                .json(&request)
                .send()
                .await
            {
                Ok(response) => match response.error_for_status() {
                    Ok(response) => match response.json::<EvalResponse>().await {
                        Ok(body) => EvalOutcome::Success(EvalResult {
                            client_id: url.clone(),
                            accuracy: body.accuracy,
                            loss: body.loss,
                            num_examples: body.num_examples,
                            duration_secs: started.elapsed().as_secs_f64(),
                        }),
                        Err(e) => EvalOutcome::Failed {
                            client_id: url.clone(),
                            reason: e.to_string(),
                        },
                    },
                    Err(e) => EvalOutcome::Failed {
                        client_id: url.clone(),
                        reason: e.to_string(),
                    },
                },
                Err(e) => {
                    warn!(client = %url, error = %e, "client unreachable for evaluate");
                    EvalOutcome::Failed {
                        client_id: url.clone(),
                        reason: e.to_string(),
                    }
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }
}
