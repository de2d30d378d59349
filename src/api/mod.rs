//! Admin API
//!
//! JSON endpoints for inspecting and mutating the proxy pool. The router is
//! served on the proxy port for requests addressed to the server itself.

pub mod handlers;
pub mod routes;

use std::sync::Arc;

use crate::proxy::health::HealthChecker;
use crate::proxy::pool::PoolManager;
use crate::proxy::rotation::ProxySelector;

pub use routes::create_router;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<PoolManager>,
    pub health: Arc<HealthChecker>,
    pub selector: Arc<dyn ProxySelector>,
}
