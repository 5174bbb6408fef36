mod handlers;
mod routes;

use pyrun_common::config::Config;
use pyrun_sandbox::Executor;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub struct AppState {
    pub executor: Executor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        )
        .with_target(false)
        .init();

    info!("pyrun API booting...");

    let config = Config::from_env().map_err(|e| {
        error!("Invalid configuration: {:#}", e);
        e
    })?;

    info!(
        timeout_ms = config.limits.timeout_ms,
        max_code_bytes = config.limits.max_code_bytes,
        max_test_cases = config.limits.max_test_cases,
        containment = %config.containment,
        "Configuration loaded"
    );

    let executor = Executor::from_config(&config).map_err(|e| {
        error!("Failed to initialize execution engine: {:#}", e);
        e
    })?;

    let state = Arc::new(AppState { executor });
    let app = routes::app(state, config.max_body_bytes);

    let listener = TcpListener::bind(&config.bind_addr).await?;

    info!("HTTP server listening on {}", config.bind_addr);
    info!("Ready to accept code");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install CTRL+C signal handler");
        std::future::pending::<()>().await;
    }
    warn!("Received shutdown signal, draining in-flight requests...");
}
