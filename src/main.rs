use std::net::SocketAddr;
use std::process::ExitCode;

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use search_gateway::{AppState, Config, build_router, metrics, utils};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!("Starting search gateway v{}", env!("CARGO_PKG_VERSION"));

    match run().await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

/// Run the application, returning an exit code on error.
async fn run() -> Result<(), exitcode::ExitCode> {
    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {e}");
        exitcode::CONFIG
    })?;
    info!(
        host = %config.host,
        port = %config.port,
        backend = %config.elasticsearch_url,
        store = %config.store_backend,
        master_bootstrap = config.master_identity().is_some(),
        "Configuration loaded"
    );

    // Metrics exporter
    if let Some(metrics_addr) = config.metrics_addr() {
        match metrics::init_metrics(metrics_addr) {
            Ok(()) => info!("Prometheus metrics on http://{metrics_addr}/metrics"),
            Err(e) => warn!("Metrics exporter disabled: {e}"),
        }
    }

    // Build application state and compose the pipeline
    let state = AppState::from_config(config.clone()).map_err(|e| {
        error!("Failed to initialise services: {e}");
        exitcode::CONFIG
    })?;
    let app = build_router(state.clone()).map_err(|e| {
        error!("Failed to compose request pipeline: {e}");
        exitcode::SOFTWARE
    })?;
    state.spawn_gauge_refresh_task();

    // Start server
    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("Gateway endpoints:");
    info!("  GET  /_gateway/health       - Health check");
    info!("  GET  /_gateway/ready        - Readiness check");
    info!("  *    /_user, /_permission   - Identity management");
    info!("  *    everything else        - Proxied to {}", config.elasticsearch_url);

    // Client IPs come from the socket when no forwarded header is trusted
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(utils::shutdown_signal())
    .await
    .map_err(|e| {
        error!("Server error: {e}");
        exitcode::SOFTWARE
    })?;

    // Drain analytics writes and stop background tasks
    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}
