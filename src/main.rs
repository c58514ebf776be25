// Autoprovider - HTTP entry point

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use autoprovider::services::store::InMemoryDialogueStore;
use autoprovider::{router, AppConfig, AppState};
use autoprovider_core::ToolRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;
    let bind = config.server.bind.clone();

    // Concrete tools are registered by the embedding deployment
    let state = AppState::from_config(config, Arc::new(InMemoryDialogueStore::new()), ToolRegistry::new())
        .context("Failed to build application state")?;
    let maintenance = state.spawn_maintenance();

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    tracing::info!(bind = %bind, version = env!("CARGO_PKG_VERSION"), "autoprovider listening");

    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    state.shutdown();
    let _ = maintenance.await;
    tracing::info!("autoprovider shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for ctrl-c: {}", e);
    }
}
