use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tradegate::api::{self, app_state::AppState};
use tradegate::config::loader::ConfigLoader;
use tradegate::observability::init_tracing;
use tradegate::security::clock::SystemClock;
use tradegate::security::events::TracingSink;
use tradegate::security::gate::Gate;
use tradegate::security::sweeper;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigLoader::load().context("failed to load configuration")?;
    let _log_guard = init_tracing(&config.logging).context("failed to initialise logging")?;

    info!(
        app = %config.app_name,
        environment = %config.environment,
        "Starting Tradegate..."
    );
    ConfigLoader::validate(&config).context("invalid configuration")?;
    info!("Configuration loaded successfully");

    let security = &config.security;
    let gate = Gate::from_settings(security, SystemClock::shared(), Arc::new(TracingSink))
        .context("failed to build admission gate")?;
    let gate = Arc::new(gate);
    info!(
        api_keys = gate.signatures().key_count(),
        rate_limiting = gate.limiter().is_enabled(),
        "Admission gate initialized"
    );

    if let Some(admin) = &security.bootstrap_admin {
        if gate.auth().account(&admin.username).is_none() {
            gate.auth()
                .create_account(&admin.username, &admin.password, &admin.role)
                .await
                .context("failed to create bootstrap account")?;
            if config.is_production() {
                warn!(username = %admin.username, "Bootstrap account created, change its password");
            }
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper_handle = sweeper::spawn(
        gate.clone(),
        Duration::from_secs(security.sweep_interval_secs.max(1)),
        security.sweep_batch,
        shutdown_rx,
    );

    let app_state = AppState::new(gate, config.server.clone());
    let router = api::initialize_api(app_state).await?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on {}", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped, shutting down background tasks");
    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper_handle.await {
        warn!(error = %e, "Sweeper task ended abnormally");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
