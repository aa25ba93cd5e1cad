//! Versioned, retrying gateway to the external Policy Engine.

mod client;
mod signature;
mod types;

pub use client::{PolicyClient, PolicyClientConfig, PolicyError};
pub use signature::{compute_signature, SignatureCache, SIGNATURE_TTL_SECS};
pub use types::{PolicyCheckRequest, PolicyCheckResult, PolicyType, PolicyVersionResponse};

#[cfg(test)]
mod integration_tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    async fn spawn_mock_policy_engine(
        allowed: bool,
    ) -> (std::net::SocketAddr, Arc<AtomicU32>) {
        let hit_count = Arc::new(AtomicU32::new(0));
        let hit_count_clone = hit_count.clone();

        let app = Router::new().route(
            "/api/v1/check",
            post(move |Json(req): Json<PolicyCheckRequest>| {
                let hit_count = hit_count_clone.clone();
                async move {
                    hit_count.fetch_add(1, Ordering::SeqCst);
                    let signature = req
                        .context
                        .get("signature")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    Json(PolicyCheckResult {
                        allowed,
                        reason: "test".to_string(),
                        parameters: serde_json::Map::new(),
                        action: None,
                        signature,
                        timestamp: chrono::Utc::now(),
                    })
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, hit_count)
    }

    #[tokio::test]
    async fn check_round_trips_signature_and_allowed_flag() {
        let (addr, _hits) = spawn_mock_policy_engine(true).await;
        let client = PolicyClient::new(PolicyClientConfig {
            base_url: format!("http://{addr}"),
            ..Default::default()
        });

        let result = client
            .check(PolicyType::ServerControl, serde_json::json!({"current_round": 1}))
            .await
            .unwrap();

        assert!(result.allowed);
    }

    #[tokio::test]
    async fn unreachable_engine_in_non_strict_mode_synthesizes_allow() {
        let client = PolicyClient::new(PolicyClientConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            max_retries: 1,
            retry_delay: Duration::from_millis(1),
            strict_mode: false,
            ..Default::default()
        });

        let result = client
            .check(PolicyType::ClientTraining, serde_json::json!({}))
            .await
            .unwrap();

        assert!(result.allowed);
        assert_eq!(result.reason, "unavailable");
    }

    #[tokio::test]
    async fn unreachable_engine_in_strict_mode_is_fatal() {
        let client = PolicyClient::new(PolicyClientConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            max_retries: 1,
            retry_delay: Duration::from_millis(1),
            strict_mode: true,
            ..Default::default()
        });

        let result = client
            .check(PolicyType::ClientTraining, serde_json::json!({}))
            .await;

        assert!(result.is_err());
    }

    async fn spawn_mock_policy_engine_with_version(
        version: Arc<AtomicU32>,
    ) -> std::net::SocketAddr {
        let app = Router::new()
            .route(
                "/api/v1/check",
                post(move |Json(req): Json<PolicyCheckRequest>| {
                    let signature = req
                        .context
                        .get("signature")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    async move {
                        Json(PolicyCheckResult {
                            allowed: true,
                            reason: "test".to_string(),
                            parameters: serde_json::Map::new(),
                            action: None,
                            signature,
                            timestamp: chrono::Utc::now(),
                        })
                    }
                }),
            )
            .route(
                "/api/v1/policy_version",
                axum::routing::get(move || {
                    let version = version.clone();
                    async move {
                        Json(serde_json::json!({
                            "policy_version": version.load(Ordering::SeqCst)
                        }))
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn repeated_identical_check_is_served_from_cache_until_version_bumps() {
        let version = Arc::new(AtomicU32::new(1));
        let addr = spawn_mock_policy_engine_with_version(version.clone()).await;
        let client = PolicyClient::new(PolicyClientConfig {
            base_url: format!("http://{addr}"),
            version_check_interval: Duration::from_millis(150),
            ..Default::default()
        });

        assert_eq!(client.poll_version().await, Some(1));

        let context = serde_json::json!({"current_round": 1});
        let first = client.check(PolicyType::ServerControl, context.clone()).await.unwrap();
        let second = client.check(PolicyType::ServerControl, context.clone()).await.unwrap();
        assert_eq!(first.signature, second.signature, "back-to-back identical checks must hit the cache");

        tokio::time::sleep(Duration::from_millis(160)).await;
        version.store(2, Ordering::SeqCst);
        assert_eq!(client.poll_version().await, Some(2));

        let third = client.check(PolicyType::ServerControl, context).await.unwrap();
        assert_ne!(first.signature, third.signature, "a version bump must evict the cache");
    }
}
