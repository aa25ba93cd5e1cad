//! Control API: JSON over HTTP on the `metrics_port`. Built on `axum`'s
//! `Router::new().route(...)` shape, with `tower-http`'s tracing layer for
//! per-request structured logs.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use fl_common::ServerStatus;
use fl_policy_client::PolicyType;
use fl_round_store::RoundFilter;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::Coordinator;

pub fn router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .route("/rounds", get(rounds))
        .route("/rounds/latest", get(rounds_latest))
        .route("/events", get(events))
        .route("/pause", post(pause))
        .route("/resume", post(resume))
        .route("/restart", post(restart))
        .layer(TraceLayer::new_for_http())
        .with_state(coordinator)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok", "timestamp": chrono::Utc::now()}))
}

async fn status(State(coordinator): State<Arc<Coordinator>>) -> impl IntoResponse {
    let state = coordinator.state.read().await;
    Json(json!({
        "server_status": state.server_status,
        "training_paused": state.training_paused,
        "pause_reason": state.pause_reason,
        "stop_reason": state.stop_reason,
        "current_round": state.current_round,
        "max_rounds": state.max_rounds,
        "restart_allowed": state.restart_allowed(),
        "connected_clients": state.connected_clients,
        "training_active": state.training_active,
        "timestamp": chrono::Utc::now(),
    }))
}

async fn metrics(State(coordinator): State<Arc<Coordinator>>) -> impl IntoResponse {
    let state = coordinator.state.read().await;
    Json(serde_json::to_value(&*state).unwrap_or(json!({})))
}

#[derive(Debug, Deserialize)]
struct RoundsQuery {
    start_round: Option<u64>,
    end_round: Option<u64>,
    min_accuracy: Option<f64>,
    max_accuracy: Option<f64>,
    limit: Option<u32>,
    offset: Option<u32>,
}

const MAX_ROUNDS_PAGE: u32 = 10_000;

async fn rounds(
    State(coordinator): State<Arc<Coordinator>>,
    Query(query): Query<RoundsQuery>,
) -> impl IntoResponse {
    let filter = RoundFilter {
        start_round: query.start_round,
        end_round: query.end_round,
        min_accuracy: query.min_accuracy,
        max_accuracy: query.max_accuracy,
    };
    let limit = query.limit.unwrap_or(100).min(MAX_ROUNDS_PAGE);
    let offset = query.offset.unwrap_or(0);

    let (records, total, latest) = tokio::join!(
        coordinator.store.range(&filter, limit, offset),
        coordinator.store.count(&filter),
        coordinator.store.latest_number(),
    );

    match (records, total, latest) {
        (Ok(records), Ok(total), Ok(latest)) => Json(json!({
            "rounds": records,
            "total_rounds": total,
            "latest_round": latest,
            "pagination": {"limit": limit, "offset": offset},
            "filters": {
                "start_round": query.start_round,
                "end_round": query.end_round,
                "min_accuracy": query.min_accuracy,
                "max_accuracy": query.max_accuracy,
            },
        }))
        .into_response(),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "round store query failed"})))
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct LatestQuery {
    limit: Option<u32>,
}

async fn rounds_latest(
    State(coordinator): State<Arc<Coordinator>>,
    Query(query): Query<LatestQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(10).min(MAX_ROUNDS_PAGE);
    let latest = match coordinator.store.latest_number().await {
        Ok(n) => n,
        Err(_) => return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "round store query failed"}))).into_response(),
    };
    let start = latest.saturating_sub(limit as u64 - 1).max(1);
    let filter = RoundFilter {
        start_round: Some(start),
        end_round: Some(latest),
        ..Default::default()
    };
    match coordinator.store.range(&filter, limit, 0).await {
        Ok(records) => Json(json!({"rounds": records, "latest_round": latest})).into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "round store query failed"}))).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    since_event_id: Option<Uuid>,
    limit: Option<usize>,
}

async fn events(
    State(coordinator): State<Arc<Coordinator>>,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(100).min(MAX_ROUNDS_PAGE as usize);
    let (events, last_event_id) = coordinator.events.since(query.since_event_id, limit);
    Json(json!({"events": events, "last_event_id": last_event_id}))
}

async fn pause(State(coordinator): State<Arc<Coordinator>>) -> impl IntoResponse {
    coordinator.pause_gate.pause("manual pause via control API").await;
    {
        let mut state = coordinator.state.write().await;
        state.training_paused = true;
        state.pause_reason = Some("manual pause via control API".to_string());
        state.server_status = ServerStatus::Paused;
    }
    coordinator
        .events
        .push(fl_common::EventType::TrainingPaused, json!({"via": "control_api"}));
    Json(json!({"success": true, "training_paused": true, "timestamp": chrono::Utc::now()}))
}

async fn resume(State(coordinator): State<Arc<Coordinator>>) -> impl IntoResponse {
    coordinator.pause_gate.resume("manual resume via control API").await;
    {
        let mut state = coordinator.state.write().await;
        state.training_paused = false;
        state.pause_reason = None;
        if state.training_active {
            state.server_status = ServerStatus::Running;
        }
    }
    coordinator
        .events
        .push(fl_common::EventType::TrainingResumed, json!({"via": "control_api"}));
    Json(json!({"success": true, "training_paused": false, "timestamp": chrono::Utc::now()}))
}

async fn restart(State(coordinator): State<Arc<Coordinator>>) -> impl IntoResponse {
    let allowed_by_state = coordinator.state.read().await.restart_allowed();
    if !allowed_by_state {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": "restart is not allowed in the current state"})),
        )
            .into_response();
    }

    let (current_round, max_rounds) = {
        let state = coordinator.state.read().await;
        (state.current_round, state.max_rounds)
    };
    let context = json!({"action": "restart", "current_round": current_round, "max_rounds": max_rounds});

    match coordinator.policy.check(PolicyType::ServerControl, context).await {
        Ok(result) if result.allowed => {
            {
                let mut state = coordinator.state.write().await;
                state.stopped_by_policy = false;
                state.stop_reason = None;
            }
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator.run_strategy_to_completion().await;
            });
            (StatusCode::OK, Json(json!({"success": true, "message": "restart accepted"}))).into_response()
        }
        Ok(result) => (
            StatusCode::FORBIDDEN,
            Json(json!({"success": false, "message": result.reason})),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"success": false, "message": e.to_string()})),
        )
            .into_response(),
    }
}
