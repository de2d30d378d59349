//! Poolgate - forward-proxy gateway
//!
//! Relays client HTTP/HTTPS traffic through a health-checked pool of
//! upstream proxies.
//!
//! ## Features
//!
//! - HTTP, HTTPS, SOCKS4, SOCKS4a, SOCKS5 and shadowsocks upstreams
//! - Periodic health checks with checkpointing and eviction of dead proxies
//! - Round-robin and per-client rotation strategies
//! - Per-request retry across upstreams with status-code policy
//! - CONNECT tunneling
//! - JSON admin API on the proxy port

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod proxy;
pub mod repository;

pub use config::Config;
pub use error::{GatewayError, Result};
