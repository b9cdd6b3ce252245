//! Persistence layer: pool construction, migrations, typed entities,
//! repositories and the job queue.

pub mod job_queue;
pub mod migrations;
pub mod models;
pub mod repository;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::{BoaError, BoaResult};

/// Database handle wrapping a SQLite pool
#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    /// Connect to a database URL (e.g. `sqlite://./data/boa.db?mode=rwc`)
    /// and run migrations.
    pub async fn connect(url: &str, max_connections: u32) -> BoaResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| BoaError::Repository(format!("Invalid database URL '{}': {}", url, e)))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5))
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        migrations::run_migrations(&pool).await?;
        tracing::info!("Connected to database: {}", url);

        Ok(Self { pool })
    }

    /// Open (or create) a SQLite file database and run migrations.
    pub async fn open_file(path: impl AsRef<Path>, max_connections: u32) -> BoaResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5))
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        migrations::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory database for tests. Pinned to a single connection so every
    /// caller sees the same memory store.
    pub async fn in_memory() -> BoaResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| BoaError::Repository(e.to_string()))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        migrations::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
