//! Database connection and schema management.
//!
//! SQLite connectivity for the job store:
//! - small connection pool (SQLite uses file-level locking)
//! - WAL journal with `synchronous=NORMAL` for crash-safe writes without
//!   full fsync on every commit
//! - automatic migration execution on open

use std::path::Path;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{info, instrument};

/// Maximum number of pooled connections. Writes serialize at the SQLite
/// layer regardless, so a handful of connections only helps readers.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// SQLite busy timeout in milliseconds. Connections wait this long for a
/// lock before surfacing `SQLITE_BUSY`.
const BUSY_TIMEOUT_MS: u32 = 5000;

/// Database-related errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// Failed to connect to or configure the database.
    #[error("failed to open database: {0}")]
    Connection(#[from] sqlx::Error),

    /// Failed to run migrations.
    #[error("failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Failed to create the data directory that holds the database file.
    #[error("failed to create data directory {dir}: {source}")]
    DataDir {
        /// Directory that could not be created.
        dir: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Database connection wrapper with connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if necessary) the jobs database inside `data_dir`.
    ///
    /// Enables WAL mode, relaxed-but-durable sync, and a busy timeout,
    /// then runs any pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::DataDir`] if the directory cannot be created,
    /// [`DbError::Connection`] if the connection fails, or
    /// [`DbError::Migration`] if migrations fail.
    #[instrument(skip(data_dir), fields(dir = %data_dir.display()))]
    pub async fn open(data_dir: &Path) -> Result<Self, DbError> {
        std::fs::create_dir_all(data_dir).map_err(|source| DbError::DataDir {
            dir: data_dir.display().to_string(),
            source,
        })?;

        let db_path = data_dir.join("jobs.db");
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(&db_url)
            .await?;

        Self::configure(&pool).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!(path = %db_path.display(), "database initialized");

        Ok(Self { pool })
    }

    /// Creates an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if the connection fails,
    /// or [`DbError::Migration`] if migrations fail.
    #[instrument]
    pub async fn open_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Applies the SQLite pragmas used by every connection.
    async fn configure(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query("PRAGMA journal_mode=WAL").execute(pool).await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(pool)
            .await?;
        sqlx::query(&format!("PRAGMA busy_timeout={BUSY_TIMEOUT_MS}"))
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Returns a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Gracefully closes all connections in the pool.
    ///
    /// Call before the process exits; the instance must not be used
    /// afterwards.
    #[instrument(skip(self))]
    pub async fn close(self) {
        self.pool.close().await;
    }
}
