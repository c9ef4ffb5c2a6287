//! growth-ab server - A/B testing REST API
//!
//! Standalone server over an embedded RocksDB store.

use anyhow::{Context, Result};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::limit::ConcurrencyLimitLayer;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::info;

use growth_ab::config::{self, LogFormat, ServerConfig};
use growth_ab::handlers::{build_api_routes, build_public_routes, AppContext};
use growth_ab::{metrics, middleware, tracing_setup};

// Shutdown timeouts
const GRACEFUL_SHUTDOWN_TIMEOUT_SECS: u64 = 30; // Max time for cleanup after draining
const DATABASE_FLUSH_TIMEOUT_SECS: u64 = 10; // Max time to flush RocksDB

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::args().any(|a| a == "--help" || a == "-h") {
        config::print_env_help();
        return Ok(());
    }

    if let Err(e) = tracing_setup::init_tracing(LogFormat::from_env()) {
        eprintln!("tracing already initialized: {e}");
    }

    metrics::register_metrics().context("Failed to register metrics")?;
    info!("📊 Metrics registered at /metrics");

    info!("🧪 Starting growth-ab server...");

    let server_config = ServerConfig::from_env();
    server_config.log();

    let state = Arc::new(AppContext::open(server_config.clone())?);

    // Keep a reference for shutdown cleanup (clone BEFORE moving into router)
    let state_for_shutdown = Arc::clone(&state);

    // API routes are rate limited; health and metrics are not
    let mut api_routes = build_api_routes(state.clone());
    if server_config.rate_limit_per_second > 0 {
        let governor_conf = GovernorConfigBuilder::default()
            .per_second(server_config.rate_limit_per_second)
            .burst_size(server_config.rate_limit_burst)
            .finish()
            .context("Failed to build governor rate limiter configuration")?;

        api_routes = api_routes.layer(GovernorLayer::new(governor_conf));
        info!(
            "⚡ Rate limiting enabled: {} req/sec, burst of {}",
            server_config.rate_limit_per_second, server_config.rate_limit_burst
        );
    }

    let public_routes = build_public_routes(state);

    let max_concurrent = server_config.max_concurrent_requests;
    info!(
        "🔄 Concurrency limiting enabled: max_concurrent={}",
        max_concurrent
    );

    let app = Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .layer(axum::middleware::from_fn(middleware::track_metrics))
        .layer(TimeoutLayer::new(Duration::from_secs(
            server_config.request_timeout_secs,
        )))
        .layer(ConcurrencyLimitLayer::new(max_concurrent))
        .layer(server_config.cors.to_layer());

    let addr: SocketAddr = server_config
        .bind_addr()
        .parse()
        .with_context(|| format!("Invalid bind address {}", server_config.bind_addr()))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("🚀 Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("🔒 Shutdown signal received, flushing store...");

    let cleanup_future = async {
        let flush_future =
            tokio::task::spawn_blocking(move || state_for_shutdown.service().flush());

        match tokio::time::timeout(
            Duration::from_secs(DATABASE_FLUSH_TIMEOUT_SECS),
            flush_future,
        )
        .await
        {
            Ok(Ok(Ok(()))) => info!("✅ Store flushed successfully"),
            Ok(Ok(Err(e))) => tracing::error!("❌ Failed to flush store: {}", e),
            Ok(Err(e)) => tracing::error!("❌ Flush task failed: {}", e),
            Err(_) => tracing::error!(
                "⏱️  Store flush timed out after {}s",
                DATABASE_FLUSH_TIMEOUT_SECS
            ),
        }
    };

    match tokio::time::timeout(
        Duration::from_secs(GRACEFUL_SHUTDOWN_TIMEOUT_SECS),
        cleanup_future,
    )
    .await
    {
        Ok(()) => info!("👋 Server shutdown complete"),
        Err(_) => {
            tracing::error!(
                "⏱️  Graceful shutdown timed out after {}s, forcing exit",
                GRACEFUL_SHUTDOWN_TIMEOUT_SECS
            );
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("🛑 Shutdown signal received, starting graceful shutdown");
}
