//! Round-robin proxy selection strategy

use async_trait::async_trait;
use std::sync::Arc;

use super::ProxySelector;
use crate::error::Result;
use crate::models::Proxy;
use crate::proxy::pool::PoolManager;

/// Selects proxies in round-robin order over the active subset
///
/// No distinction is made between identities.
pub struct RoundRobinSelector {
    pool: Arc<PoolManager>,
}

impl RoundRobinSelector {
    pub fn new(pool: Arc<PoolManager>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProxySelector for RoundRobinSelector {
    async fn select(&self, _identity: &str) -> Result<Arc<Proxy>> {
        self.pool.next_active()
    }

    fn available_count(&self) -> usize {
        self.pool.active_total()
    }

    fn strategy_name(&self) -> &'static str {
        "round_robin"
    }
}
