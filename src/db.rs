//! Database pool and schema bootstrap.
//!
//! Postgres backs deployments; SQLite backs tests and local runs. An
//! in-memory SQLite database exists per connection, so its pool is pinned to
//! a single connection or every query would see a different empty schema.

use std::time::Duration;

use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Statement};
use tokio::time::sleep;

use crate::config::AppConfig;

const CONNECT_ATTEMPTS: u32 = 5;
const FIRST_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("database URL is empty")]
    EmptyUrl,
    #[error("unsupported database scheme '{scheme}' (expected postgres or sqlite)")]
    UnsupportedScheme { scheme: String },
    #[error("could not reach the database after {attempts} attempts: {source}")]
    Unreachable { attempts: u32, source: DbErr },
    #[error("schema migration failed: {0}")]
    Migration(DbErr),
}

/// Storage backend selected by the URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Sqlite { in_memory: bool },
}

impl Backend {
    pub fn from_url(url: &str) -> Result<Self, DatabaseError> {
        if url.trim().is_empty() {
            return Err(DatabaseError::EmptyUrl);
        }
        let scheme = url.split(':').next().unwrap_or_default();
        match scheme {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "sqlite" => Ok(Self::Sqlite {
                in_memory: url.contains(":memory:") || url.contains("mode=memory"),
            }),
            other => Err(DatabaseError::UnsupportedScheme {
                scheme: other.to_string(),
            }),
        }
    }
}

fn connect_options(cfg: &AppConfig, backend: Backend) -> ConnectOptions {
    let mut opt = ConnectOptions::new(&cfg.database_url);
    opt.acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    match backend {
        Backend::Sqlite { in_memory: true } => {
            opt.max_connections(1).min_connections(1);
        }
        Backend::Sqlite { in_memory: false } => {
            opt.max_connections(cfg.db_max_connections);
        }
        Backend::Postgres => {
            opt.max_connections(cfg.db_max_connections)
                .idle_timeout(Duration::from_secs(600))
                .max_lifetime(Duration::from_secs(1800));
        }
    }
    opt
}

/// Opens the connection pool, retrying with exponential backoff.
///
/// Only Postgres is retried; a SQLite file either opens or it doesn't.
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection, DatabaseError> {
    let backend = Backend::from_url(&cfg.database_url)?;
    let opt = connect_options(cfg, backend);
    let attempts = match backend {
        Backend::Postgres => CONNECT_ATTEMPTS,
        Backend::Sqlite { .. } => 1,
    };

    let mut delay = FIRST_RETRY_DELAY;
    let mut attempt = 1;
    loop {
        match Database::connect(opt.clone()).await {
            Ok(db) => {
                tracing::info!(?backend, attempt, "Connected to database");
                return Ok(db);
            }
            Err(source) if attempt >= attempts => {
                return Err(DatabaseError::Unreachable { attempts, source });
            }
            Err(err) => {
                tracing::warn!(
                    attempt,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "Database connection failed, retrying"
                );
                sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
        }
    }
}

/// Opens the pool and brings the schema up to date.
pub async fn init_schema(cfg: &AppConfig) -> Result<DatabaseConnection, DatabaseError> {
    let db = init_pool(cfg).await?;
    Migrator::up(&db, None)
        .await
        .map_err(DatabaseError::Migration)?;
    tracing::info!("Database migrations applied");
    Ok(db)
}

/// Runs `SELECT 1` against the pool.
pub async fn health_check(db: &DatabaseConnection) -> Result<(), DbErr> {
    db.query_one(Statement::from_string(
        db.get_database_backend(),
        "SELECT 1".to_string(),
    ))
    .await?;
    Ok(())
}

#[cfg(test)]
pub(crate) async fn migrated_memory_db() -> DatabaseConnection {
    let config = AppConfig {
        database_url: "sqlite::memory:".to_string(),
        ..AppConfig::default()
    };
    init_schema(&config).await.expect("in-memory sqlite schema")
}
