//! Proposal Desk API server
//!
//! Serves the tenant-scoped REST API:
//! - customers, contacts, products and proposals
//! - users and entitlements
//! - the aggregated dashboard and notifications

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{debug, info};

use proposal_desk::app::AppState;
use proposal_desk::config::Config;
use proposal_desk::http::build_router;
use proposal_desk::util::logging::init_tracing;
use proposal_desk::util::time::init_server_time;

/// How often idle tenant rate-limit buckets are dropped
const LIMITER_SWEEP: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(&config.log_level, config.log_json);
    init_server_time();

    info!("Starting Proposal Desk");
    info!(
        environment = ?config.environment,
        store = ?config.store_backend,
        "Server address: {}",
        config.server_addr
    );

    let state = AppState::new(config.clone());

    let limiter = state.limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(LIMITER_SWEEP);
        loop {
            interval.tick().await;
            limiter.retain_recent();
            debug!(tenants = limiter.len(), "Rate limiter swept");
        }
    });

    let router = build_router(state);

    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
