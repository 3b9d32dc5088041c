//! PostgreSQL access for the credential and usage tables.
//!
//! The pool is opened once at startup and migrated before any store uses it.

use crate::config::DatabaseConfig;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use thiserror::Error;

/// Upper bound on the `/health` probe, so a stuck database reports as
/// unavailable instead of hanging the check.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("failed to connect to PostgreSQL: {0}")]
    Connect(#[from] sqlx::Error),
    #[error("failed to migrate credential/usage schema: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections.min(config.max_connections))
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
}

/// Open the pool and bring the schema up to date.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
    tracing::info!(
        max_connections = config.max_connections,
        "Connecting to PostgreSQL"
    );
    let pool = pool_options(config).connect(&config.url).await?;
    run_migrations(&pool).await?;
    tracing::info!("PostgreSQL ready");
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub async fn health_check(pool: &PgPool) -> Result<(), sqlx::Error> {
    match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, sqlx::query("SELECT 1").execute(pool)).await {
        Ok(result) => result.map(|_| ()),
        Err(_) => Err(sqlx::Error::PoolTimedOut),
    }
}
