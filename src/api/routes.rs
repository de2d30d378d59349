//! API route definitions

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::AppState;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/status", get(handlers::health::status))
        .route(
            "/proxies",
            get(handlers::proxy::list_proxies)
                .post(handlers::proxy::add_proxy)
                .delete(handlers::proxy::remove_proxy),
        )
        .route("/proxies/check", post(handlers::proxy::check_proxy))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
