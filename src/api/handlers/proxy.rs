//! Proxy management handlers

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::api::AppState;
use crate::error::GatewayError;
use crate::models::Proxy;

/// Body of add requests
#[derive(Debug, Deserialize)]
pub struct AddProxyRequest {
    pub proxy: String,
    pub weight: Option<i32>,
}

/// Body of remove and check requests
#[derive(Debug, Deserialize)]
pub struct ProxyUriRequest {
    pub proxy: String,
}

/// List all proxies
pub async fn list_proxies(State(state): State<AppState>) -> impl IntoResponse {
    let proxies: Vec<_> = state.pool.list().iter().map(|p| p.snapshot()).collect();
    Json(proxies)
}

/// Register a proxy and schedule its first check
pub async fn add_proxy(
    State(state): State<AppState>,
    Json(req): Json<AddProxyRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let mut proxy = Proxy::parse(&req.proxy)?;
    if let Some(weight) = req.weight {
        proxy = proxy.with_weight(weight);
    }
    let uri = proxy.uri().to_string();

    if !state.pool.insert(proxy) {
        return Ok((StatusCode::OK, Json(json!({ "proxy": uri, "added": false }))));
    }
    info!(proxy = %uri, "Added proxy");

    let health = state.health.clone();
    let target = uri.clone();
    tokio::spawn(async move {
        if let Err(e) = health.check_uri(&target).await {
            warn!(proxy = %target, "Initial check failed: {}", e);
        }
    });

    Ok((StatusCode::CREATED, Json(json!({ "proxy": uri, "added": true }))))
}

/// Remove a proxy from the registry and the active subset
pub async fn remove_proxy(
    State(state): State<AppState>,
    Json(req): Json<ProxyUriRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let uri = req.proxy.trim();
    if !state.pool.remove(uri) {
        return Err(GatewayError::ProxyNotFound(uri.to_string()));
    }

    info!(proxy = %uri, "Removed proxy");
    Ok(StatusCode::NO_CONTENT)
}

/// Check one proxy now and return its updated state
pub async fn check_proxy(
    State(state): State<AppState>,
    Json(req): Json<ProxyUriRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let uri = req.proxy.trim();
    let passed = state.health.check_uri(uri).await?;
    let proxy = state
        .pool
        .get(uri)
        .ok_or_else(|| GatewayError::ProxyNotFound(uri.to_string()))?;

    Ok(Json(json!({
        "passed": passed,
        "proxy": proxy.snapshot(),
    })))
}
