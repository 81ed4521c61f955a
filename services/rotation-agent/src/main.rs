//! Vault Rotation Agent
//!
//! Single-binary service that:
//! 1. Reads a database credential from Vault and starts the pool with it
//! 2. Rotates the credential in the background before each lease runs out
//! 3. Serves /health and /metrics
//! 4. Closes the pool on SIGTERM/SIGINT, which stops rotation

mod config;
mod metrics;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use common::Secret;
use credential_rotation::{
    FractionalLeasePolicy, PgPoolFactory, PoolConfig, RefreshScheduler, RotationConfig,
    TokioTaskScheduler,
};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use vault_client::VaultClient;

use crate::config::Config;

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    scheduler: Arc<RefreshScheduler>,
    pool: Arc<PgPool>,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

/// Build the axum router with all routes and shared state.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting vault-rotation-agent");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        vault_address = %config.vault.address,
        mount_path = %config.rotation.mount_path,
        role = %config.rotation.role,
        refresh_fraction = config.rotation.refresh_fraction,
        listen_addr = %config.agent.listen_addr,
        "configuration loaded"
    );

    let scheduler = build_scheduler(&config)?;
    let factory = if config.pool.connect_lazily {
        PgPoolFactory::lazy()
    } else {
        PgPoolFactory::new()
    };

    // Fails fast on a bad token, role or address; the pool is never started
    let pool = scheduler
        .attach(&factory)
        .await
        .context("failed to start pool with initial database credentials")?;

    let app_state = AppState {
        scheduler,
        pool: Arc::clone(&pool),
        prometheus: prometheus_handle,
        started_at: Instant::now(),
    };
    let app = build_router(app_state, config.agent.max_connections);

    let listen_addr = config.agent.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "serving health and metrics");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        warn!(error = %e, "server error during shutdown");
    }

    // The next rotation firing sees the closed pool and stops
    pool.close().await;
    info!("shutdown complete");
    Ok(())
}

/// Wire the Vault client, lease policy and tokio timer into a scheduler.
fn build_scheduler(config: &Config) -> Result<Arc<RefreshScheduler>> {
    let token: Secret<String> = config
        .vault
        .token
        .clone()
        .context("no Vault token configured")?;
    let client = VaultClient::new(
        &config.vault.address,
        token,
        Duration::from_secs(config.vault.timeout_secs),
    )
    .context("failed to build Vault client")?;
    info!(vault_address = %client.address(), "vault client ready");

    let policy = FractionalLeasePolicy::new(config.rotation.refresh_fraction)?;
    let timer = TokioTaskScheduler::try_current()?;

    let rotation = RotationConfig::new(&config.rotation.mount_path, &config.rotation.role)
        .with_retry_delay(Duration::from_secs(config.rotation.retry_delay_secs));
    let max_lifetime = match config.pool.max_lifetime_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    let pool_config = PoolConfig::new(&config.pool.url)
        .with_max_size(config.pool.max_size)
        .with_min_idle(config.pool.min_idle)
        .with_acquire_timeout(Duration::from_secs(config.pool.acquire_timeout_secs))
        .with_max_lifetime(max_lifetime);

    Ok(RefreshScheduler::new(
        Arc::new(client),
        Arc::new(timer),
        Arc::new(policy),
        rotation,
        pool_config,
    ))
}

/// Health endpoint: rotation progress plus pool occupancy.
/// Returns 200 while rotating, 503 once the pool or rotation is closed.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let rotation = state.scheduler.health().await;
    let closed = state.pool.is_closed() || rotation["state"] == "closed";

    let status_code = if closed {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    } else {
        axum::http::StatusCode::OK
    };
    let body = serde_json::json!({
        "status": if closed { "closed" } else { "healthy" },
        "rotation": rotation,
        "pool": {
            "size": state.pool.size(),
            "idle": state.pool.num_idle(),
            "closed": state.pool.is_closed(),
        },
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    });

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
