//! SQLite connection setup and embedded migrations

use crate::config::DatabaseConfig;
use crate::error::{IngestError, Result};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Schema for the destination table and the job repository.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Open the configured database, creating the file if needed, and migrate it
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool> {
    let options = connect_options(config)?.create_if_missing(true);

    if let Some(parent) = options.get_filename().parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .map_err(|e| IngestError::resource(parent.display().to_string(), e))?;
        }
    }

    open_pool(config, options).await
}

/// Open a database that must already exist; nothing is created on disk
pub async fn open_existing(config: &DatabaseConfig) -> Result<SqlitePool> {
    let options = connect_options(config)?.create_if_missing(false);
    open_pool(config, options).await
}

fn connect_options(config: &DatabaseConfig) -> Result<SqliteConnectOptions> {
    config.check_url()?;

    let options = SqliteConnectOptions::from_str(&config.url)
        .map_err(|e| {
            IngestError::configuration(format!("invalid database URL '{}': {}", config.url, e))
        })?
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal);
    Ok(options)
}

async fn open_pool(config: &DatabaseConfig, options: SqliteConnectOptions) -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect_with(options)
        .await?;
    debug!(url = %config.url, "Connected to database");

    MIGRATOR.run(&pool).await?;
    info!(url = %config.url, "Database ready");

    Ok(pool)
}

/// Migrated single-connection in-memory database for unit tests
#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    MIGRATOR.run(&pool).await.unwrap();
    pool
}
