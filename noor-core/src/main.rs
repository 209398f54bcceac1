// Noor server
// Entry point: logging, configuration and the HTTP server

use anyhow::Context;
use noor_core::config::Config;
use noor_core::{server, AppState};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "noor_core=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Noor server");

    let config = Config::load();
    let addr = config.addr.clone();

    let state = AppState::initialize(config)
        .await
        .context("failed to initialize application state")?;

    server::serve(&addr, Arc::new(state))
        .await
        .with_context(|| format!("server on {} stopped with an error", addr))?;

    Ok(())
}
