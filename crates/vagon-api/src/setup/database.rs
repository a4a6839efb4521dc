//! Database setup and initialization

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use vagon_core::{Config, StoreBackend};
use vagon_db::{InMemoryVagonetaRepository, PostgresVagonetaRepository, VagonetaRepository};

/// Setup database connection pool and run migrations
pub async fn setup_database(config: &Config) -> Result<PgPool> {
    let database_url = config
        .database_url()
        .context("DATABASE_URL must be set when STORE_BACKEND=postgres")?;

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections())
        .acquire_timeout(Duration::from_secs(config.db_timeout_seconds()))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!(
        max_connections = config.db_max_connections(),
        "Database connected successfully"
    );

    // Workspace migrations/ relative to the crate root
    let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
    let migrator = sqlx::migrate::Migrator::new(migrations_dir)
        .await
        .context("Failed to load migrations")?;
    migrator
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(pool)
}

/// Build the record repository for the configured backend
pub async fn setup_repository(config: &Config) -> Result<Arc<dyn VagonetaRepository>> {
    let repository: Arc<dyn VagonetaRepository> = match config.store_backend() {
        StoreBackend::Postgres => {
            let pool = setup_database(config).await?;
            Arc::new(PostgresVagonetaRepository::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory record store; records are lost on restart");
            Arc::new(InMemoryVagonetaRepository::new())
        }
    };
    tracing::info!(backend = repository.backend_name(), "Record store ready");
    Ok(repository)
}
