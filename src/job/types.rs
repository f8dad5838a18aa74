//! Job entity, lifecycle states, and API payload types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle state of a download job.
///
/// A job starts `Pending`, moves to `Processing` when a worker picks it
/// up, and ends in exactly one of the terminal states `Done` or `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum JobStatus {
    /// Admitted, waiting in the dispatcher queue.
    Pending,
    /// A worker is running the extractor for this job.
    Processing,
    /// Artifact uploaded and download URL issued. Terminal.
    Done,
    /// Execution failed with a classified reason. Terminal.
    Error,
}

impl JobStatus {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    /// Returns true for the terminal states.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single download job.
///
/// The store owns the persisted state; workers hold a transient copy and
/// write updates through.
#[derive(Debug, Clone, FromRow)]
pub struct Job {
    /// Opaque identifier, canonical UUID text. The only externally
    /// exposed handle.
    pub id: String,
    /// Normalized source URL. Immutable after creation.
    pub url: String,
    /// Display title from the media metadata; empty until parsed.
    pub title: Option<String>,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Object-store key of the artifact; set once upload succeeds.
    pub file_key: Option<String>,
    /// Local filesystem path of the artifact during processing.
    pub file_path: Option<String>,
    /// Time-limited URL clients use to fetch the artifact; `Done` only.
    pub download_url: Option<String>,
    /// Download progress 0-100, monotonically non-decreasing per run.
    pub progress: i64,
    /// Classified failure reason; `Error` only.
    pub error: Option<String>,
    /// UTC timestamp of admission.
    pub created_at: DateTime<Utc>,
    /// UTC timestamp of the terminal transition.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a pending job for a normalized URL.
    #[must_use]
    pub fn new(id: String, url: String) -> Self {
        Self {
            id,
            url,
            title: None,
            status: JobStatus::Pending,
            file_key: None,
            file_path: None,
            download_url: None,
            progress: 0,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Transitions the job to `Processing`.
    pub fn mark_processing(&mut self) {
        self.status = JobStatus::Processing;
    }

    /// Transitions the job to `Done` with the issued download URL.
    ///
    /// Forces progress to 100 so the `done ⇔ progress == 100` invariant
    /// holds even when the extractor never emitted a final progress line.
    pub fn mark_done(&mut self, download_url: String) {
        self.status = JobStatus::Done;
        self.download_url = Some(download_url);
        self.progress = 100;
        self.completed_at = Some(Utc::now());
    }

    /// Transitions the job to `Error` with a classified reason.
    pub fn mark_error(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Error;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    /// Updates the progress percentage, clamped to 0-100.
    pub fn set_progress(&mut self, progress: u8) {
        self.progress = i64::from(progress.min(100));
    }

    /// Builds the public status view of this job.
    #[must_use]
    pub fn to_status_response(&self) -> StatusResponse {
        StatusResponse {
            id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            title: self.title.clone(),
            download_url: self.download_url.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Job {{ id: {}, url: {}, status: {} }}",
            self.id, self.url, self.status
        )
    }
}

/// Metadata parsed from the extractor's structured JSON line.
///
/// Lives only for the duration of one job execution.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoInfo {
    /// Media title.
    #[serde(default)]
    pub title: String,
    /// Duration in seconds.
    #[serde(default)]
    pub duration: f64,
    /// Thumbnail URL when available.
    #[serde(default)]
    pub thumbnail: Option<String>,
    /// Filesize estimate in bytes when the extractor reports one.
    #[serde(default)]
    pub filesize: Option<i64>,
    /// Extractor-chosen filename (relative to the output directory).
    #[serde(default)]
    pub filename: Option<String>,
    /// Canonical page URL.
    #[serde(default)]
    pub webpage_url: Option<String>,
}

/// Body of `POST /api/download`.
#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    /// Source URL to fetch.
    pub url: String,
}

/// Body of the 202 response to `POST /api/download`.
#[derive(Debug, Serialize)]
pub struct DownloadResponse {
    /// Identifier to poll on `GET /api/status/{job_id}`.
    pub job_id: String,
}

/// Public job view returned by `GET /api/status/{job_id}`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub id: String,
    pub status: JobStatus,
    pub progress: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Body of `GET /api/health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub queue_size: usize,
    pub workers: usize,
}
