//! Application setup and initialization
//!
//! Everything main.rs needs to go from a `Config` to a running router, split
//! so tests can build the same router over in-memory backends.

pub mod database;
pub mod routes;
pub mod server;
pub mod services;
pub mod storage;
pub mod validation;

use std::sync::Arc;

use anyhow::{Context, Result};
use vagon_core::Config;

use crate::state::AppState;
use services::Backends;

/// Initialize the entire application
pub async fn initialize_app(config: Config) -> Result<(Arc<AppState>, axum::Router)> {
    validation::validate_config(&config).context("Configuration validation failed")?;
    tracing::info!(
        environment = %config.environment(),
        "Configuration loaded and validated successfully"
    );

    let repository = database::setup_repository(&config).await?;
    let storage = storage::setup_storage(&config).await?;
    let recognizer = services::setup_recognizer(&config)?;

    build_app(
        &config,
        Backends {
            repository,
            storage,
            recognizer,
        },
    )
    .await
}

/// Build state and router over the given backends
pub async fn build_app(
    config: &Config,
    backends: Backends,
) -> Result<(Arc<AppState>, axum::Router)> {
    let state = services::initialize_services(config, backends).await?;
    let router = routes::setup_routes(config, state.clone())?;
    Ok((state, router))
}
