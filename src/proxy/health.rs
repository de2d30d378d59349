//! Health checking for upstream proxies
//!
//! Periodically checks proxy availability, moves proxies in and out of the
//! active subset, checkpoints the registry and evicts proxies that have not
//! passed a check for too long.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{CONTENT_LENGTH, USER_AGENT};
use hyper::{Method, Request, Response};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::time::{interval, timeout};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use super::pool::PoolManager;
use super::transport::{send_direct, TransportFactory};
use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::models::Proxy;

/// Placeholder in the alive-check URL replaced by a fresh random token per request
const RAND_PLACEHOLDER: &str = "{%rand}";
const RAND_PLACEHOLDER_ENCODED: &str = "%7B%rand%7D";

/// Health checker configuration
#[derive(Debug, Clone)]
pub struct HealthCheckerConfig {
    /// Interval between full test runs; also the cache lifetime of one result
    pub check_interval: Duration,
    /// Timeout for each probe
    pub check_timeout: Duration,
    /// Reference URL; `None` switches to plain TCP probing
    pub alive_url: Option<Url>,
    /// Proxies without a passing check for this long are evicted
    pub stale_after: Duration,
    /// Probes in flight at once during a run
    pub concurrency: usize,
}

impl HealthCheckerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            check_interval: config.pool.check_interval(),
            check_timeout: config.proxy.timeout(),
            alive_url: config.pool.alive_check_url.clone(),
            stale_after: config.pool.stale_after(),
            concurrency: config.pool.check_concurrency,
        }
    }
}

impl Default for HealthCheckerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(crate::config::DEFAULT_CHECK_INTERVAL_SECS),
            check_timeout: Duration::from_secs(30),
            alive_url: None,
            stale_after: Duration::from_secs(crate::config::DEFAULT_STALE_AFTER_SECS),
            concurrency: 100,
        }
    }
}

/// Outcome of one full test run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RunSummary {
    pub checked: usize,
    pub passed: usize,
    pub evicted: usize,
}

/// Health checker for upstream proxies
pub struct HealthChecker {
    pool: Arc<PoolManager>,
    config: HealthCheckerConfig,
    baseline: OnceLock<u64>,
    running: Mutex<()>,
    key_locks: DashMap<String, Arc<Mutex<()>>>,
    permits: Semaphore,
}

impl HealthChecker {
    /// Create a new health checker
    pub fn new(pool: Arc<PoolManager>, config: HealthCheckerConfig) -> Self {
        let permits = Semaphore::new(config.concurrency.max(1));
        Self {
            pool,
            config,
            baseline: OnceLock::new(),
            running: Mutex::new(()),
            key_locks: DashMap::new(),
            permits,
        }
    }

    pub fn config(&self) -> &HealthCheckerConfig {
        &self.config
    }

    /// Fetch the alive-check URL directly to capture the reference length.
    ///
    /// A failure here is fatal: without a baseline no proxy could ever pass.
    pub async fn prepare(&self) -> Result<()> {
        let Some(url) = &self.config.alive_url else {
            info!("No alive-check URL configured, probing proxies with TCP connect");
            return Ok(());
        };

        let response = send_direct(alive_request(url)?, self.config.check_timeout)
            .await
            .map_err(|e| {
                GatewayError::InvalidConfig(format!("alive-check URL {} unreachable: {}", url, e))
            })?;
        let length = response_length(response, self.config.check_timeout).await?;

        let _ = self.baseline.set(length);
        info!(url = %url, length, "alive-check baseline captured");
        Ok(())
    }

    /// Run the health checker (call in a spawned task)
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting health checker with {}s interval",
            self.config.check_interval.as_secs()
        );

        let mut check_interval = interval(self.config.check_interval);

        loop {
            tokio::select! {
                _ = check_interval.tick() => {
                    self.run_test().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Health checker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Check every registered proxy, then evict stale ones and checkpoint.
    ///
    /// Returns `None` when another run is already in flight.
    pub async fn run_test(&self) -> Option<RunSummary> {
        let Ok(_running) = self.running.try_lock() else {
            debug!("Health check run already in progress, skipping");
            return None;
        };

        let started = Utc::now();
        let proxies = self.pool.list();
        info!("Checking health of {} proxies", proxies.len());

        let results =
            futures::future::join_all(proxies.iter().map(|proxy| self.check(proxy, false))).await;

        let mut summary = RunSummary {
            checked: results.len(),
            passed: results.iter().filter(|&&ok| ok).count(),
            evicted: 0,
        };

        let cutoff = started - chrono::Duration::seconds(self.config.stale_after.as_secs() as i64);
        for proxy in self.pool.list().iter() {
            if proxy.last_alive() >= cutoff {
                continue;
            }
            match self.pool.evict(proxy).await {
                Ok(true) => summary.evicted += 1,
                Ok(false) => {}
                Err(e) => error!(proxy = %proxy.uri(), "Failed to record evicted proxy: {}", e),
            }
        }
        self.key_locks.retain(|uri, _| self.pool.get(uri).is_some());

        if let Err(e) = self.pool.checkpoint().await {
            error!("Failed to checkpoint proxy pool: {}", e);
        }

        info!(
            "Health check complete: {} passed, {} failed, {} evicted, {} active",
            summary.passed,
            summary.checked - summary.passed,
            summary.evicted,
            self.pool.active_total()
        );
        Some(summary)
    }

    /// Probe one registered proxy now, bypassing the result cache
    pub async fn check_uri(&self, uri: &str) -> Result<bool> {
        let proxy = self
            .pool
            .get(uri)
            .ok_or_else(|| GatewayError::ProxyNotFound(uri.to_string()))?;
        Ok(self.check(&proxy, true).await)
    }

    /// Check one proxy and sync its active-subset membership with the result.
    ///
    /// Probes of the same proxy never overlap. Without `force`, a result younger
    /// than the check interval is reused.
    pub async fn check(&self, proxy: &Arc<Proxy>, force: bool) -> bool {
        let lock = self
            .key_locks
            .entry(proxy.uri().to_string())
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        let state = proxy.check_state();
        if !force {
            if let Some(last) = state.last_check {
                let age = Utc::now().signed_duration_since(last);
                if age.to_std().map_or(true, |age| age < self.config.check_interval) {
                    let active = proxy.is_active();
                    self.sync_membership(proxy, active);
                    return active;
                }
            }
        }

        let _permit = self.permits.acquire().await.ok();
        let started = Utc::now();
        let timer = Instant::now();
        let result = self.probe(proxy).await;
        let used = timer.elapsed();

        let passed = result.is_ok();
        proxy.record_check(started, used, passed);
        self.sync_membership(proxy, passed);

        match result {
            Ok(()) => debug!(proxy = %proxy.uri(), used_ms = used.as_millis() as u64, "proxy check passed"),
            Err(e) => debug!(proxy = %proxy.uri(), used_ms = used.as_millis() as u64, "proxy check failed: {}", e),
        }
        passed
    }

    fn sync_membership(&self, proxy: &Proxy, active: bool) {
        if active {
            self.pool.activate(proxy.uri());
        } else {
            self.pool.deactivate(proxy.uri());
        }
    }

    async fn probe(&self, proxy: &Proxy) -> Result<()> {
        let check_timeout = self.config.check_timeout;

        let Some(url) = &self.config.alive_url else {
            return match timeout(check_timeout, TcpStream::connect(proxy.addr())).await {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(e)) => Err(GatewayError::ProxyConnectionFailed(format!(
                    "connect {}: {}",
                    proxy.addr(),
                    e
                ))),
                Err(_) => Err(GatewayError::Timeout),
            };
        };

        let expected = *self
            .baseline
            .get()
            .ok_or_else(|| GatewayError::Internal("alive-check baseline not captured".into()))?;

        let strategy = TransportFactory::build(proxy.url())?;
        let response = strategy.send(alive_request(url)?, check_timeout).await?;
        let length = response_length(response, check_timeout).await?;

        if length != expected {
            warn!(proxy = %proxy.uri(), expected, length, "alive-check length mismatch");
            return Err(GatewayError::ProxyConnectionFailed(format!(
                "content length wrong, {} != {}",
                expected, length
            )));
        }
        Ok(())
    }
}

fn alive_request(url: &Url) -> Result<Request<Full<Bytes>>> {
    let token = uuid::Uuid::new_v4().simple().to_string();
    let target = url
        .as_str()
        .replace(RAND_PLACEHOLDER_ENCODED, &token)
        .replace(RAND_PLACEHOLDER, &token);

    Ok(Request::builder()
        .method(Method::GET)
        .uri(target)
        .header(USER_AGENT, concat!("poolgate/", env!("CARGO_PKG_VERSION")))
        .body(Full::new(Bytes::new()))?)
}

/// `Content-Length` when announced, otherwise the body size read within `limit`
async fn response_length(response: Response<Incoming>, limit: Duration) -> Result<u64> {
    let announced = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    if let Some(length) = announced {
        return Ok(length);
    }

    let body = timeout(limit, response.into_body().collect())
        .await
        .map_err(|_| GatewayError::Timeout)??;
    Ok(body.to_bytes().len() as u64)
}

/// Guard for managing health checker lifecycle
pub struct HealthCheckerHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl HealthCheckerHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for HealthCheckerHandle {
    fn default() -> Self {
        Self::new().0
    }
}
