//! Database connection pool for the catalog store.
//!
//! SQLite (tests, single-node installs) and Postgres are both supported through SeaORM.

use anyhow::{Context, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::AppConfig;

const CONNECT_ATTEMPTS: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {source}")]
    ConnectionFailed {
        #[from]
        source: sea_orm::DbErr,
    },
    #[error("Invalid database configuration: {message}")]
    InvalidConfiguration { message: String },
    #[error("Database connection is closed")]
    Disconnected,
}

/// Open the pool, retrying transient connection failures with exponential backoff.
///
/// ```no_run
/// use catalog_sync::{config::AppConfig, db::init_pool};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let db = init_pool(&AppConfig::default()).await?;
///     catalog_sync::db::health_check(&db).await?;
///     Ok(())
/// }
/// ```
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    if cfg.database_url.trim().is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "Database URL cannot be empty".to_string(),
        }
        .into());
    }

    let mut opt = ConnectOptions::new(&cfg.database_url);
    opt.max_connections(cfg.db_max_connections)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let mut retry_delay = Duration::from_millis(100);
    let mut attempt = 1;
    loop {
        match Database::connect(opt.clone()).await {
            Ok(conn) => {
                info!(attempt, "Connected to database");
                return Ok(conn);
            }
            Err(err) if attempt >= CONNECT_ATTEMPTS => {
                error!(attempts = attempt, error = %err, "Giving up connecting to database");
                return Err(DatabaseError::ConnectionFailed { source: err }.into());
            }
            Err(err) => {
                warn!(attempt, error = %err, ?retry_delay, "Database connection failed, retrying");
                sleep(retry_delay).await;
                retry_delay *= 2;
                attempt += 1;
            }
        }
    }
}

/// Round-trip a trivial query to prove the pool is usable.
pub async fn health_check(db: &DatabaseConnection) -> Result<()> {
    if matches!(db, DatabaseConnection::Disconnected) {
        return Err(DatabaseError::Disconnected.into());
    }
    let stmt = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());
    db.query_one(stmt)
        .await
        .context("Database health check failed")?;
    Ok(())
}
