//! Pool manager shared by the health checker, the selectors and the handler

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};

use super::registry::ProxyList;
use crate::error::Result;
use crate::models::{GroupNumbers, Proxy, ProxyCount, ProxyScheme, UsageOutcome};
use crate::repository::PoolStore;

/// Owns the full registry, its active subset and the aggregate counters.
///
/// Only the health checker moves proxies in and out of the active subset.
/// Changes that touch both lists hold `membership`, so the active subset is
/// always a subset of the registry.
pub struct PoolManager {
    all: ProxyList,
    active: ProxyList,
    membership: Mutex<()>,
    count: ProxyCount,
    store: PoolStore,
    started_at: DateTime<Utc>,
}

impl PoolManager {
    pub fn new(store: PoolStore) -> Self {
        Self {
            all: ProxyList::new(),
            active: ProxyList::new(),
            membership: Mutex::new(()),
            count: ProxyCount::new(),
            store,
            started_at: Utc::now(),
        }
    }

    pub fn store(&self) -> &PoolStore {
        &self.store
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Load the checked list, then every candidate not already known
    pub async fn load(&self) -> Result<usize> {
        let checked = self.store.load_checked().await?;
        let candidates = self.store.load_candidates().await?;
        let (n_checked, n_candidates) = (checked.len(), candidates.len());

        for proxy in checked.into_iter().chain(candidates) {
            self.insert(proxy);
        }

        let total = self.all.total();
        if total == 0 {
            warn!(dir = %self.store.dir().display(), "proxy pool list is empty");
        }
        info!(
            checked = n_checked,
            candidates = n_candidates,
            total,
            "proxy pool loaded"
        );
        Ok(total)
    }

    /// Register a proxy by URI; false if it is already known
    pub fn add(&self, uri: &str) -> Result<bool> {
        Ok(self.insert(Proxy::parse(uri)?))
    }

    pub fn insert(&self, proxy: Proxy) -> bool {
        self.all.add(Arc::new(proxy))
    }

    /// Drop a proxy from the registry and the active subset
    pub fn remove(&self, uri: &str) -> bool {
        let _membership = self.membership.lock();
        self.active.remove(uri);
        self.all.remove(uri)
    }

    pub fn get(&self, uri: &str) -> Option<Arc<Proxy>> {
        self.all.get(uri)
    }

    pub fn list(&self) -> Arc<Vec<Arc<Proxy>>> {
        self.all.snapshot()
    }

    pub fn total(&self) -> usize {
        self.all.total()
    }

    pub fn active_total(&self) -> usize {
        self.active.total()
    }

    pub fn is_active(&self, uri: &str) -> bool {
        self.active.contains(uri)
    }

    /// Promote a registered proxy into the active subset
    pub fn activate(&self, uri: &str) -> bool {
        let _membership = self.membership.lock();
        match self.all.get(uri) {
            Some(proxy) => self.active.add(proxy),
            None => false,
        }
    }

    pub fn deactivate(&self, uri: &str) -> bool {
        self.active.remove(uri)
    }

    /// Next active proxy in round-robin order; bumps its usage counter
    pub fn next_active(&self) -> Result<Arc<Proxy>> {
        let proxy = self.active.next()?;
        proxy.incr_used();
        Ok(proxy)
    }

    pub fn active_snapshot(&self) -> Arc<Vec<Arc<Proxy>>> {
        self.active.snapshot()
    }

    /// Record the outcome of one forwarding attempt
    pub fn mark_status(&self, proxy: &Proxy, outcome: UsageOutcome) {
        proxy.count().mark(outcome);
        self.count.mark(outcome);
    }

    pub fn count(&self) -> &ProxyCount {
        &self.count
    }

    /// Counters for the status view: total, active and active per scheme
    pub fn numbers(&self) -> GroupNumbers {
        let mut numbers = GroupNumbers::new();
        numbers.add("total", self.all.total());

        let active = self.active.snapshot();
        numbers.add("active", active.len());
        for scheme in ProxyScheme::ALL {
            numbers.add(format!("active_{}", scheme), 0);
        }
        for proxy in active.iter() {
            numbers.add(format!("active_{}", proxy.scheme()), 1);
        }
        numbers
    }

    /// Persist the whole registry to the checked list
    pub async fn checkpoint(&self) -> Result<()> {
        self.store.save_checked(&self.all.snapshot()).await
    }

    /// Permanently remove a proxy and append it to the audit log
    pub async fn evict(&self, proxy: &Arc<Proxy>) -> Result<bool> {
        if !self.remove(proxy.uri()) {
            return Ok(false);
        }

        warn!(
            proxy = %proxy.uri(),
            last_alive = %proxy.last_alive(),
            "evicting stale proxy"
        );
        self.store.append_evicted(proxy).await?;
        Ok(true)
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("total", &self.all.total())
            .field("active", &self.active.total())
            .field("count", &self.count.snapshot())
            .finish()
    }
}
