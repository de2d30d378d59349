//! Poolgate - Entry Point
//!
//! Loads the proxy pool, starts the health checker and the proxy server, and
//! shuts both down gracefully.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use poolgate::api::{self, AppState};
use poolgate::config::{Config, LogConfig};
use poolgate::proxy::{
    create_selector, HealthChecker, HealthCheckerConfig, HealthCheckerHandle, PoolManager,
    ProxyHandler, ProxyHandlerConfig, ProxyServer, RotationStrategy,
};
use poolgate::repository::PoolStore;

#[tokio::main]
async fn main() -> poolgate::Result<()> {
    // Load configuration
    let config = Config::from_env()?;
    init_tracing(&config.log);

    info!("Starting Poolgate");

    // Load the pool; nothing is active until its first check passes
    let pool = Arc::new(PoolManager::new(PoolStore::new(&config.pool.conf_dir)));
    pool.load().await?;

    // Capture the alive-check baseline before serving anything
    let health = Arc::new(HealthChecker::new(
        pool.clone(),
        HealthCheckerConfig::from_config(&config),
    ));
    health.prepare().await?;

    // Create shutdown channels
    let (shutdown_tx, _) = watch::channel(false);

    // Start health checker
    let (health_handle, health_shutdown) = HealthCheckerHandle::new();
    let health_task = tokio::spawn({
        let health = health.clone();
        async move {
            health.run(health_shutdown).await;
        }
    });

    let strategy = RotationStrategy::from_str(&config.proxy.rotation_strategy);
    let selector = create_selector(strategy, pool.clone(), shutdown_tx.subscribe());
    info!("Using rotation strategy: {}", strategy.as_str());

    let handler = Arc::new(ProxyHandler::new(
        pool.clone(),
        selector.clone(),
        ProxyHandlerConfig::from_config(&config.proxy),
    ));
    let admin = api::create_router(AppState {
        pool: pool.clone(),
        health,
        selector,
    });
    let proxy_server = ProxyServer::new(config.proxy.clone(), handler, admin);

    let proxy_shutdown = shutdown_tx.subscribe();
    let proxy_task = tokio::spawn(async move {
        if let Err(e) = proxy_server.run(proxy_shutdown).await {
            error!("Proxy server error: {}", e);
        }
    });

    info!("Server started - Proxy: {}", config.proxy_addr());

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    health_handle.shutdown();

    let _ = tokio::join!(proxy_task, health_task);

    if let Err(e) = pool.checkpoint().await {
        error!("Final checkpoint failed: {}", e);
    }

    info!("Poolgate stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("poolgate={},tower_http=info", log.level)));
    let registry = tracing_subscriber::registry().with(filter);

    if log.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
