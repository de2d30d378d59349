//! Per-client anti-repetition selection strategy

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info};

use super::ProxySelector;
use crate::error::{GatewayError, Result};
use crate::models::Proxy;
use crate::proxy::pool::PoolManager;

/// Identities remembered at once; the least recently seen is dropped first
pub const MAX_IDENTITIES: usize = 10_000;
/// How long a hand-out is remembered for one identity
pub const USED_TTL: Duration = Duration::from_secs(1200);

#[derive(Debug)]
struct ClientUsage {
    used: HashMap<String, Instant>,
    last_seen: Instant,
}

/// Hands each identity a proxy it has not used yet, until it has used them all
///
/// Memory is bounded by [`MAX_IDENTITIES`] and entries expire after [`USED_TTL`].
pub struct PerClientSelector {
    pool: Arc<PoolManager>,
    clients: Mutex<HashMap<String, ClientUsage>>,
    cursor: AtomicUsize,
    max_identities: usize,
    ttl: Duration,
}

impl PerClientSelector {
    pub fn new(pool: Arc<PoolManager>) -> Self {
        Self::with_limits(pool, MAX_IDENTITIES, USED_TTL)
    }

    pub fn with_limits(pool: Arc<PoolManager>, max_identities: usize, ttl: Duration) -> Self {
        Self {
            pool,
            clients: Mutex::new(HashMap::new()),
            cursor: AtomicUsize::new(0),
            max_identities: max_identities.max(1),
            ttl,
        }
    }

    /// Number of identities currently remembered
    pub fn tracked(&self) -> usize {
        self.clients.lock().len()
    }

    /// Forget hand-outs older than the TTL; returns the identities dropped
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let mut clients = self.clients.lock();
        let before = clients.len();

        clients.retain(|_, usage| {
            usage
                .used
                .retain(|_, at| now.duration_since(*at) < self.ttl);
            !usage.used.is_empty()
        });

        before - clients.len()
    }

    /// Prune every TTL period until shutdown
    pub async fn run_pruner(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.ttl.max(Duration::from_secs(1)));
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let dropped = self.prune();
                    if dropped > 0 {
                        debug!(dropped, "pruned per-client usage");
                    }
                }
                _ = shutdown.changed() => {
                    info!("Per-client pruner shutting down");
                    break;
                }
            }
        }
    }

    fn evict_oldest(clients: &mut HashMap<String, ClientUsage>) {
        let oldest = clients
            .iter()
            .min_by_key(|(_, usage)| usage.last_seen)
            .map(|(name, _)| name.clone());
        if let Some(name) = oldest {
            clients.remove(&name);
        }
    }
}

#[async_trait]
impl ProxySelector for PerClientSelector {
    async fn select(&self, identity: &str) -> Result<Arc<Proxy>> {
        let active = self.pool.active_snapshot();
        if active.is_empty() {
            return Err(GatewayError::NoActiveProxy);
        }

        let now = Instant::now();
        let mut clients = self.clients.lock();
        if !clients.contains_key(identity) && clients.len() >= self.max_identities {
            Self::evict_oldest(&mut clients);
        }

        let usage = clients
            .entry(identity.to_string())
            .or_insert_with(|| ClientUsage {
                used: HashMap::new(),
                last_seen: now,
            });
        usage.last_seen = now;

        let exhausted = active
            .iter()
            .all(|proxy| usage.used.contains_key(proxy.uri()));
        if exhausted {
            usage.used.clear();
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        let proxy = (0..active.len())
            .map(|offset| &active[(start + offset) % active.len()])
            .find(|proxy| !usage.used.contains_key(proxy.uri()))
            .cloned()
            .ok_or(GatewayError::NoActiveProxy)?;

        usage.used.insert(proxy.uri().to_string(), now);
        proxy.incr_used();
        Ok(proxy)
    }

    fn available_count(&self) -> usize {
        self.pool.active_total()
    }

    fn strategy_name(&self) -> &'static str {
        "per_client"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::pool_store::tests::temp_dir;
    use crate::repository::PoolStore;
    use std::collections::HashSet;

    fn pool_with(n: usize) -> Arc<PoolManager> {
        let pool = Arc::new(PoolManager::new(PoolStore::new(temp_dir("per-client"))));
        for i in 1..=n {
            let uri = format!("http://127.0.0.1:{}", 8080 + i);
            pool.add(&uri).unwrap();
            pool.activate(&uri);
        }
        pool
    }

    #[tokio::test]
    async fn test_no_repeat_until_all_used() {
        let selector = PerClientSelector::new(pool_with(3));

        let mut seen = HashSet::new();
        for _ in 0..3 {
            let proxy = selector.select("alice").await.unwrap();
            assert!(seen.insert(proxy.uri().to_string()));
        }

        // all used: the next pick starts a fresh round
        assert!(seen.contains(selector.select("alice").await.unwrap().uri()));
    }

    #[tokio::test]
    async fn test_identities_are_independent() {
        let selector = PerClientSelector::new(pool_with(2));

        let a1 = selector.select("alice").await.unwrap();
        let b1 = selector.select("bob").await.unwrap();
        let a2 = selector.select("alice").await.unwrap();
        let b2 = selector.select("bob").await.unwrap();

        assert_ne!(a1.uri(), a2.uri());
        assert_ne!(b1.uri(), b2.uri());
        assert_eq!(selector.tracked(), 2);
    }

    #[tokio::test]
    async fn test_identity_count_is_bounded() {
        let selector = PerClientSelector::with_limits(pool_with(2), 2, USED_TTL);

        selector.select("a").await.unwrap();
        selector.select("b").await.unwrap();
        selector.select("a").await.unwrap();
        selector.select("c").await.unwrap();

        // "b" was the least recently seen
        assert_eq!(selector.tracked(), 2);
        let clients = selector.clients.lock();
        assert!(clients.contains_key("a"));
        assert!(clients.contains_key("c"));
    }

    #[tokio::test]
    async fn test_prune_drops_expired_entries() {
        let selector = PerClientSelector::with_limits(pool_with(2), 10, Duration::ZERO);
        selector.select("alice").await.unwrap();
        selector.select("bob").await.unwrap();

        assert_eq!(selector.prune(), 2);
        assert_eq!(selector.tracked(), 0);
    }

    #[tokio::test]
    async fn test_empty_pool() {
        let selector = PerClientSelector::new(pool_with(0));
        assert!(matches!(
            selector.select("alice").await,
            Err(GatewayError::NoActiveProxy)
        ));
        assert_eq!(selector.tracked(), 0);
    }
}
