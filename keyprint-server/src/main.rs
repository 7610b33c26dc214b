//! Keyprint Server binary
//!
//! Boots the REST API: loads configuration from the environment, connects
//! the device registry (PostgreSQL or in-memory fallback), and serves the
//! biometric authentication endpoints.

use std::time::Duration;

use tracing_subscriber::EnvFilter;

use keyprint_server::{create_router, AppState, Config, DeviceRegistry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("keyprint_server=info,info")),
        )
        .init();

    let config = Config::from_env();
    let registry = DeviceRegistry::from_env().await?;
    let state = AppState::new(&config, registry);

    // Expired challenges pile up between logins without this
    let challenges = state.challenges.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            challenges.cleanup_expired();
        }
    });

    let app = create_router(state, &config);
    let addr = config.socket_addr();

    tracing::info!(%addr, "Keyprint server listening");
    tracing::info!("API docs at http://{addr}/swagger-ui");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        return;
    }
    tracing::info!("Shutdown signal received, draining connections");
}
