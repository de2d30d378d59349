//! Liveness and pool status endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::json;

use crate::api::AppState;

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "poolgate"
        })),
    )
}

/// Pool status: group numbers, aggregate counters and uptime
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let started_at = state.pool.started_at();
    let uptime = (Utc::now() - started_at).num_seconds().max(0);
    let health = state.health.config();

    Json(json!({
        "numbers": state.pool.numbers(),
        "count": state.pool.count().snapshot(),
        "strategy": state.selector.strategy_name(),
        "check_interval_secs": health.check_interval.as_secs(),
        "alive_check_url": health.alive_url.as_ref().map(|u| u.as_str()),
        "started_at": started_at,
        "uptime_secs": uptime,
    }))
}
