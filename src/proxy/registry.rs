//! Concurrent proxy sets keyed by URI

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::RwLock;

use crate::error::{GatewayError, Result};
use crate::models::Proxy;

/// A set of proxies keyed by URI.
///
/// Membership lives behind a reader/writer lock. Every mutation republishes an
/// ordered snapshot through `ArcSwap`, so iteration and `next()` never take the
/// lock. The snapshot order is stable between mutations.
pub struct ProxyList {
    entries: RwLock<BTreeMap<String, Arc<Proxy>>>,
    ordered: ArcSwap<Vec<Arc<Proxy>>>,
    cursor: AtomicUsize,
}

impl ProxyList {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            ordered: ArcSwap::from_pointee(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Insert a proxy; returns false if the URI is already present
    pub fn add(&self, proxy: Arc<Proxy>) -> bool {
        let mut entries = self.entries.write();
        if entries.contains_key(proxy.uri()) {
            return false;
        }
        entries.insert(proxy.uri().to_string(), proxy);
        self.rebuild(&entries);
        true
    }

    pub fn remove(&self, uri: &str) -> bool {
        let mut entries = self.entries.write();
        if entries.remove(uri).is_none() {
            return false;
        }
        self.rebuild(&entries);
        true
    }

    pub fn get(&self, uri: &str) -> Option<Arc<Proxy>> {
        self.entries.read().get(uri).cloned()
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.entries.read().contains_key(uri)
    }

    pub fn total(&self) -> usize {
        self.ordered.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Point-in-time copy of the membership, in rotation order
    pub fn snapshot(&self) -> Arc<Vec<Arc<Proxy>>> {
        self.ordered.load_full()
    }

    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&Arc<Proxy>),
    {
        for proxy in self.snapshot().iter() {
            visitor(proxy);
        }
    }

    /// Next member in rotation order.
    ///
    /// Consecutive calls visit every member once before any repeats, as long as
    /// membership does not change in between.
    pub fn next(&self) -> Result<Arc<Proxy>> {
        let ordered = self.ordered.load();
        if ordered.is_empty() {
            return Err(GatewayError::NoActiveProxy);
        }

        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % ordered.len();
        ordered.get(idx).cloned().ok_or(GatewayError::NoActiveProxy)
    }

    // Called with the write lock held so the snapshot always matches `entries`.
    fn rebuild(&self, entries: &BTreeMap<String, Arc<Proxy>>) {
        self.ordered
            .store(Arc::new(entries.values().cloned().collect()));
        self.cursor.store(0, Ordering::Relaxed);
    }
}

impl Default for ProxyList {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProxyList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyList")
            .field("total", &self.total())
            .finish()
    }
}
