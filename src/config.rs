use std::collections::BTreeSet;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::{GatewayError, Result};

/// Upper bound for the per-attempt timeout
pub const MAX_TIMEOUT_SECS: u64 = 120;
/// Check intervals at or below this many seconds fall back to the default
pub const CHECK_INTERVAL_FLOOR_SECS: u64 = 60;
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 1800;
pub const DEFAULT_STALE_AFTER_SECS: u64 = 24 * 60 * 60;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Proxy server configuration
    pub proxy: ProxyServerConfig,
    /// Upstream pool and health check configuration
    pub pool: PoolConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ProxyServerConfig {
    /// Port for the proxy server (default: 8090)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Per-attempt timeout in seconds, capped at 120
    pub timeout: u64,
    /// Default retry count (attempts = retry + 1)
    pub retry: u32,
    /// Highest retry count a client may ask for
    pub retry_max: u32,
    /// Upstream status codes that count as a failed attempt
    pub wrong_status: BTreeSet<u16>,
    /// Rotation strategy (round_robin, per_client)
    pub rotation_strategy: String,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Directory holding pool.conf, pool_checked.conf and pool_bad.list
    pub conf_dir: PathBuf,
    /// Reference URL for the alive check; `None` means plain TCP probing
    pub alive_check_url: Option<Url>,
    /// Seconds between full test runs
    pub check_interval: u64,
    /// Seconds without a successful check before a proxy is evicted
    pub stale_after: u64,
    /// Probes allowed in flight during one run
    pub check_concurrency: usize,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            proxy: ProxyServerConfig {
                port: get_env_or("PROXY_PORT", "8090").parse().map_err(|_| {
                    GatewayError::InvalidConfig("PROXY_PORT must be a valid port number".into())
                })?,
                host: get_env_or("PROXY_HOST", "0.0.0.0"),
                timeout: clamp_timeout(get_env_or("PROXY_TIMEOUT", "30").parse().unwrap_or(30)),
                retry: get_env_or("PROXY_RETRY", "0").parse().unwrap_or(0),
                retry_max: get_env_or("PROXY_RETRY_MAX", "0").parse().unwrap_or(0),
                wrong_status: parse_status_list(&get_env_or("PROXY_WRONG_STATUS", "")),
                rotation_strategy: get_env_or("PROXY_ROTATION_STRATEGY", "round_robin"),
            },
            pool: PoolConfig {
                conf_dir: PathBuf::from(get_env_or("POOL_CONF_DIR", "./conf")),
                alive_check_url: parse_alive_check_url()?,
                check_interval: normalize_check_interval(
                    get_env_or("CHECK_INTERVAL", "1800").parse().unwrap_or(0),
                ),
                stale_after: get_env_or("CHECK_STALE_AFTER", "86400")
                    .parse()
                    .unwrap_or(DEFAULT_STALE_AFTER_SECS),
                check_concurrency: get_env_or("CHECK_CONCURRENCY", "100")
                    .parse::<usize>()
                    .unwrap_or(100)
                    .max(1),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }

    /// Get the proxy server address
    pub fn proxy_addr(&self) -> String {
        format!("{}:{}", self.proxy.host, self.proxy.port)
    }
}

impl ProxyServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl PoolConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after)
    }
}

/// Parse a comma-separated list of status codes, ignoring junk and zeroes
pub fn parse_status_list(raw: &str) -> BTreeSet<u16> {
    raw.split(',')
        .filter_map(|s| s.trim().parse::<u16>().ok())
        .filter(|code| *code > 0)
        .collect()
}

pub fn normalize_check_interval(secs: u64) -> u64 {
    if secs <= CHECK_INTERVAL_FLOOR_SECS {
        DEFAULT_CHECK_INTERVAL_SECS
    } else {
        secs
    }
}

fn clamp_timeout(secs: u64) -> u64 {
    secs.clamp(1, MAX_TIMEOUT_SECS)
}

fn parse_alive_check_url() -> Result<Option<Url>> {
    let raw = env::var("CHECK_ALIVE_URL").unwrap_or_default();
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    let url = Url::parse(raw).map_err(|e| {
        GatewayError::InvalidConfig(format!("CHECK_ALIVE_URL must be a valid URL: {}", e))
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(GatewayError::InvalidConfig(format!(
            "CHECK_ALIVE_URL has unsupported scheme: {}",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(GatewayError::InvalidConfig(
            "CHECK_ALIVE_URL must include a host".into(),
        ));
    }

    Ok(Some(url))
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
