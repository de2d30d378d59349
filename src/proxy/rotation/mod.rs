//! Proxy rotation strategies
//!
//! This module provides the strategies for picking one active proxy per
//! forwarding attempt.

mod per_client;
mod round_robin;

pub use per_client::PerClientSelector;
pub use round_robin::RoundRobinSelector;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::Result;
use crate::models::Proxy;
use crate::proxy::pool::PoolManager;

/// Strategy types for proxy rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    #[default]
    RoundRobin,
    PerClient,
}

impl RotationStrategy {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "per_client" | "perclient" | "per-client" => Self::PerClient,
            _ => Self::RoundRobin,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::PerClient => "per_client",
        }
    }
}

/// Trait for proxy selection strategies
///
/// Implementations pick from the pool's active subset and bump the usage
/// counter of the proxy they hand out.
#[async_trait]
pub trait ProxySelector: Send + Sync {
    /// Select a proxy for one attempt on behalf of `identity`
    ///
    /// Returns `NoActiveProxy` if the active subset is empty
    async fn select(&self, identity: &str) -> Result<Arc<Proxy>>;

    /// Get the number of available proxies
    fn available_count(&self) -> usize;

    /// Get the strategy name
    fn strategy_name(&self) -> &'static str;
}

/// Create a proxy selector based on the strategy type
///
/// The per-client strategy gets a background pruner that stops with `shutdown`.
pub fn create_selector(
    strategy: RotationStrategy,
    pool: Arc<PoolManager>,
    shutdown: watch::Receiver<bool>,
) -> Arc<dyn ProxySelector> {
    match strategy {
        RotationStrategy::RoundRobin => Arc::new(RoundRobinSelector::new(pool)),
        RotationStrategy::PerClient => {
            let selector = Arc::new(PerClientSelector::new(pool));
            tokio::spawn(selector.clone().run_pruner(shutdown));
            selector
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::pool_store::tests::temp_dir;
    use crate::repository::PoolStore;

    #[test]
    fn test_rotation_strategy_from_str() {
        assert_eq!(
            RotationStrategy::from_str("round-robin"),
            RotationStrategy::RoundRobin
        );
        assert_eq!(
            RotationStrategy::from_str("PER_CLIENT"),
            RotationStrategy::PerClient
        );
        assert_eq!(
            RotationStrategy::from_str("unknown"),
            RotationStrategy::RoundRobin
        );
    }

    #[test]
    fn test_rotation_strategy_as_str() {
        assert_eq!(RotationStrategy::RoundRobin.as_str(), "round_robin");
        assert_eq!(RotationStrategy::PerClient.as_str(), "per_client");
    }

    #[tokio::test]
    async fn test_create_selector_strategy_name() {
        let pool = Arc::new(PoolManager::new(PoolStore::new(temp_dir("rotation"))));
        let (tx, rx) = watch::channel(false);

        assert_eq!(
            create_selector(RotationStrategy::RoundRobin, pool.clone(), rx.clone())
                .strategy_name(),
            "round_robin"
        );
        assert_eq!(
            create_selector(RotationStrategy::PerClient, pool, rx).strategy_name(),
            "per_client"
        );

        let _ = tx.send(true);
    }
}
