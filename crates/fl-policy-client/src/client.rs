//! The Policy Client: every externally-visible decision point asks the
//! Policy Engine whether an action is allowed.
//!
//! An async component wrapping a shared `reqwest::Client`, composed with
//! `fl-resilience`'s retry/circuit-breaker pair, and a periodically-polled
//! background value for the policy version.

use crate::signature::{compute_signature, SignatureCache};
use crate::types::{PolicyCheckRequest, PolicyCheckResult, PolicyType, PolicyVersionResponse};
use chrono::Utc;
use fl_resilience::{CallError, CircuitBreaker, CircuitBreakerConfig, RetryConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("policy engine unreachable: {0}")]
    Unavailable(String),
    #[error("policy check signature invalid or expired")]
    SignatureInvalid,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct PolicyClientConfig {
    pub base_url: String,
    pub server_id: String,
    pub strict_mode: bool,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub version_check_interval: Duration,
}

impl Default for PolicyClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            server_id: "fl-coordinator".to_string(),
            strict_mode: false,
            timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_delay: Duration::from_millis(2000),
            version_check_interval: Duration::from_secs(30),
        }
    }
}

struct CachedCheck {
    result: PolicyCheckResult,
    cached_at: Instant,
}

/// Versioned, retrying gateway to the external Policy Engine.
///
/// Cheap to clone: the HTTP client, circuit breaker, and signature cache
/// are all internally `Arc`-shared.
#[derive(Clone)]
pub struct PolicyClient {
    http: reqwest::Client,
    config: PolicyClientConfig,
    circuit_breaker: Arc<CircuitBreaker>,
    signatures: Arc<SignatureCache>,
    cached_version: Arc<AtomicU64>,
    last_version_check: Arc<RwLock<Option<Instant>>>,
    response_cache: Arc<RwLock<HashMap<String, CachedCheck>>>,
}

impl PolicyClient {
    pub fn new(config: PolicyClientConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("failed to build policy engine http client");

        Self {
            http,
            config,
            circuit_breaker: Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
                name: "policy-engine".to_string(),
                ..Default::default()
            })),
            signatures: Arc::new(SignatureCache::new()),
            cached_version: Arc::new(AtomicU64::new(0)),
            last_version_check: Arc::new(RwLock::new(None)),
            response_cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Ask the Policy Engine whether `policy_type` is allowed given
    /// `context`, augmenting the context with timestamp, signature, and
    /// server id, then verifying the returned signature before trusting
    /// the result.
    ///
    /// Identical `(policy_type, context)` pairs reuse the last result
    /// without a new round trip as long as it is younger than
    /// `version_check_interval`; a policy version bump evicts the whole
    /// cache, not just the entry that was checked.
    pub async fn check(
        &self,
        policy_type: PolicyType,
        context: serde_json::Value,
    ) -> Result<PolicyCheckResult, PolicyError> {
        let cache_key = format!("{}:{}", policy_type.as_str(), context);
        if let Some(cached) = self.response_cache.read().await.get(&cache_key) {
            if cached.cached_at.elapsed() < self.config.version_check_interval {
                return Ok(cached.result.clone());
            }
        }

        let result = self.check_uncached(policy_type, context).await?;
        self.response_cache.write().await.insert(
            cache_key,
            CachedCheck { result: result.clone(), cached_at: Instant::now() },
        );
        Ok(result)
    }

    async fn check_uncached(
        &self,
        policy_type: PolicyType,
        mut context: serde_json::Value,
    ) -> Result<PolicyCheckResult, PolicyError> {
        let timestamp = Utc::now().to_rfc3339();
        let signature = compute_signature(policy_type.as_str(), &context, &timestamp);

        if let Some(obj) = context.as_object_mut() {
            obj.insert("timestamp".into(), timestamp.clone().into());
            obj.insert("signature".into(), signature.clone().into());
            obj.insert("server_id".into(), self.config.server_id.clone().into());
        }

        self.signatures.issue(signature.clone(), Utc::now());

        let request = PolicyCheckRequest {
            policy_type: policy_type.as_str().to_string(),
            context,
        };

        match self.send_with_resilience(&request).await {
            Ok(result) => {
                if !self.signatures.verify(&result.signature, Utc::now()) {
                    warn!(policy_type = policy_type.as_str(), "policy result signature invalid or expired");
                    return Err(PolicyError::SignatureInvalid);
                }
                Ok(result)
            }
            Err(e) => {
                if self.config.strict_mode {
                    Err(PolicyError::Unavailable(e.to_string()))
                } else {
                    warn!(policy_type = policy_type.as_str(), error = %e, "policy engine unavailable, synthesizing allow");
                    let fallback_signature =
                        compute_signature(policy_type.as_str(), &serde_json::Value::Null, &timestamp);
                    self.signatures.issue(fallback_signature.clone(), Utc::now());
                    Ok(PolicyCheckResult {
                        allowed: true,
                        reason: "unavailable".to_string(),
                        parameters: serde_json::Map::new(),
                        action: None,
                        signature: fallback_signature,
                        timestamp: Utc::now(),
                    })
                }
            }
        }
    }

    async fn send_with_resilience(
        &self,
        request: &PolicyCheckRequest,
    ) -> Result<PolicyCheckResult, PolicyError> {
        let retry_config = RetryConfig {
            max_attempts: self.config.max_retries,
            initial_delay_ms: self.config.retry_delay.as_millis() as u64,
            max_delay_ms: (self.config.retry_delay.as_millis() as u64).max(4000),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        };

        let breaker = self.circuit_breaker.clone();
        let result = fl_resilience::retry(
            &retry_config,
            |e: &PolicyError| !matches!(e, PolicyError::SignatureInvalid),
            || {
                let breaker = breaker.clone();
                async move {
                    match breaker.call(|| self.send_once(request)).await {
                        Ok(value) => Ok(value),
                        Err(CallError::Open(open)) => Err(PolicyError::Unavailable(open.to_string())),
                        Err(CallError::Failed(e)) => Err(e),
                    }
                }
            },
        )
        .await;

        result.map_err(|e| match e {
            fl_resilience::RetryError::MaxAttemptsExceeded { last_error, .. } => last_error,
        })
    }

    async fn send_once(&self, request: &PolicyCheckRequest) -> Result<PolicyCheckResult, PolicyError> {
        let v1_url = format!("{}/api/v1/check", self.config.base_url);
        let response = self.http.post(&v1_url).json(request).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            let legacy_url = format!("{}/api/check_policy", self.config.base_url);
            let legacy_response = self.http.post(&legacy_url).json(request).send().await?;
            return Ok(legacy_response.error_for_status()?.json().await?);
        }

        Ok(response.error_for_status()?.json().await?)
    }

    /// Poll `/api/v1/policy_version`, at most once per
    /// `version_check_interval`. Returns `Some(new_version)` only when the
    /// version actually changed, in which case the signature cache is
    /// flushed and the caller should emit `POLICY_VERSION_UPDATED`.
    /// A policy update never clears `stopped_by_policy` on its own.
    pub async fn poll_version(&self) -> Option<u64> {
        {
            let last = self.last_version_check.read().await;
            if let Some(last) = *last {
                if last.elapsed() < self.config.version_check_interval {
                    return None;
                }
            }
        }
        *self.last_version_check.write().await = Some(Instant::now());

        let url = format!("{}/api/v1/policy_version", self.config.base_url);
        let response = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "failed to poll policy version");
                return None;
            }
        };
        let parsed: PolicyVersionResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to parse policy version response");
                return None;
            }
        };

        let previous = self.cached_version.swap(parsed.policy_version, Ordering::SeqCst);
        if previous != parsed.policy_version {
            self.signatures.flush();
            self.response_cache.write().await.clear();
            info!(previous, new = parsed.policy_version, "policy version updated");
            Some(parsed.policy_version)
        } else {
            None
        }
    }

    pub fn cached_version(&self) -> u64 {
        self.cached_version.load(Ordering::SeqCst)
    }
}
