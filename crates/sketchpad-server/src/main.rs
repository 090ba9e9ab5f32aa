use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sketchpad_server::config::{Args, ConfigError, ServerConfig};
use sketchpad_server::identity::LocalIdentity;
use sketchpad_server::provider::V0Client;
use sketchpad_server::{AppState, build_router};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = match ServerConfig::from_args(Args::parse()) {
        Ok(config) => config,
        Err(ConfigError::MissingVariables(missing)) => {
            for var in &missing {
                error!(name = var.name, example = var.example, "{}", var.description);
            }
            return Err(ConfigError::MissingVariables(missing).into());
        }
    };

    let store = config
        .database
        .open()
        .await
        .context("Failed to open the database")?;
    let provider = V0Client::new(config.api_key.clone(), config.api_url.clone())
        .context("Failed to build the v0 client")?;
    info!(api_url = provider.base_url(), "Using v0 API");

    let state = Arc::new(AppState {
        provider: Arc::new(provider),
        identity: Arc::new(LocalIdentity::new(store.clone())),
        store,
        limits: config.limits,
    });

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!(addr = %config.bind, "Starting sketchpad server");

    axum::serve(listener, build_router(state))
        .await
        .context("Server stopped unexpectedly")?;
    Ok(())
}
