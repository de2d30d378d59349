//! Proxy server implementation
//!
//! This module provides the forwarding core:
//! - Proxy registry, active subset and pool manager
//! - Transport strategies per upstream scheme
//! - Health checking
//! - Proxy rotation strategies
//! - Request relaying with retry logic and CONNECT tunnels

pub mod body;
pub mod handler;
pub mod health;
pub mod pool;
pub mod registry;
pub mod request_log;
pub mod rotation;
pub mod server;
pub mod transport;
pub mod tunnel;

pub use handler::{ProxyHandler, ProxyHandlerConfig};
pub use health::{HealthChecker, HealthCheckerConfig, HealthCheckerHandle};
pub use pool::PoolManager;
pub use rotation::{create_selector, ProxySelector, RotationStrategy};
pub use server::ProxyServer;
pub use transport::{ConnectionStrategy, TransportFactory};
pub use tunnel::TunnelHandler;
