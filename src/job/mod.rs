//! Job lifecycle store.
//!
//! SQLite-backed persistence for download jobs through their lifecycle
//! (pending → processing → done/error).
//!
//! # Overview
//!
//! - [`Job`] / [`JobStatus`] - the central entity and its state machine
//! - [`JobStore`] - durable operations keyed by job id
//! - [`StoreError`] - operation error types
//!
//! The store exclusively owns persisted state. Exactly one worker owns a
//! job at a time, so per-job writes never race; readers observe either
//! the pre-update or post-update row.

mod error;
mod types;

pub use error::{StoreDbErrorKind, StoreError};
pub use types::{
    DownloadRequest, DownloadResponse, HealthResponse, Job, JobStatus, StatusResponse, VideoInfo,
};

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::Row;
use tracing::{info, instrument};

use crate::db::Database;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Durable job repository.
#[derive(Debug, Clone)]
pub struct JobStore {
    db: Database,
}

impl JobStore {
    /// Creates a new store over the given database connection.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a new job row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails (including a
    /// duplicate id, surfaced as a constraint violation).
    #[instrument(skip(self, job), fields(job_id = %job.id, url = %job.url))]
    pub async fn create(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r"INSERT INTO jobs
                  (id, url, title, status, file_key, file_path, download_url,
                   progress, error, created_at, completed_at)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.id)
        .bind(&job.url)
        .bind(&job.title)
        .bind(job.status)
        .bind(&job.file_key)
        .bind(&job.file_path)
        .bind(&job.download_url)
        .bind(job.progress)
        .bind(&job.error)
        .bind(job.created_at)
        .bind(job.completed_at)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Fetches a job by id. Returns `None` when no row exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r"SELECT id, url, title, status, file_key, file_path, download_url,
                     progress, error, created_at, completed_at
              FROM jobs
              WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(job)
    }

    /// Overwrites the mutable fields of an existing job.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::JobNotFound`] if no row matches the id,
    /// or [`StoreError::Database`] if the update fails.
    #[instrument(skip(self, job), fields(job_id = %job.id, status = %job.status))]
    pub async fn update(&self, job: &Job) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE jobs
              SET title = ?, status = ?, file_key = ?, file_path = ?,
                  download_url = ?, progress = ?, error = ?, completed_at = ?
              WHERE id = ?",
        )
        .bind(&job.title)
        .bind(job.status)
        .bind(&job.file_key)
        .bind(&job.file_path)
        .bind(&job.download_url)
        .bind(job.progress)
        .bind(&job.error)
        .bind(job.completed_at)
        .bind(&job.id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(job.id.clone()));
        }

        Ok(())
    }

    /// Hot-path write of the progress column only.
    ///
    /// Callers throttle this; it intentionally skips the not-found check
    /// to keep the per-progress-line cost at a single statement.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    pub async fn update_progress(&self, id: &str, progress: i64) -> Result<()> {
        sqlx::query("UPDATE jobs SET progress = ? WHERE id = ?")
            .bind(progress)
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Writes the status column only.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn update_status(&self, id: &str, status: JobStatus) -> Result<()> {
        sqlx::query("UPDATE jobs SET status = ? WHERE id = ?")
            .bind(status)
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Returns all jobs in the given status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            r"SELECT id, url, title, status, file_key, file_path, download_url,
                     progress, error, created_at, completed_at
              FROM jobs
              WHERE status = ?
              ORDER BY created_at ASC",
        )
        .bind(status)
        .fetch_all(self.db.pool())
        .await?;

        Ok(jobs)
    }

    /// Deletes jobs created more than `age` ago. Returns the row count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn delete_older_than(&self, age: std::time::Duration) -> Result<u64> {
        let age = ChronoDuration::from_std(age).unwrap_or(ChronoDuration::MAX);
        let threshold = Utc::now() - age;

        let result = sqlx::query("DELETE FROM jobs WHERE created_at < ?")
            .bind(threshold)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected())
    }

    /// Returns the total number of jobs.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM jobs")
            .fetch_one(self.db.pool())
            .await?;
        Ok(row.get("n"))
    }

    /// Returns the number of jobs in the given status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn count_by_status(&self, status: JobStatus) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM jobs WHERE status = ?")
            .bind(status)
            .fetch_one(self.db.pool())
            .await?;
        Ok(row.get("n"))
    }

    /// Fails every job left in `processing` by a previous run.
    ///
    /// A process killed mid-subprocess leaves its job without a terminal
    /// state; this startup sweep moves those rows to `error` so clients
    /// polling them are not stuck forever. Returns the row count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn fail_interrupted(&self) -> Result<u64> {
        let result = sqlx::query(
            r"UPDATE jobs
              SET status = 'error', error = 'DOWNLOAD_ERROR: interrupted by restart',
                  completed_at = ?
              WHERE status = 'processing'",
        )
        .bind(Utc::now())
        .execute(self.db.pool())
        .await?;

        let swept = result.rows_affected();
        if swept > 0 {
            info!(swept, "failed jobs interrupted by a previous shutdown");
        }
        Ok(swept)
    }
}
