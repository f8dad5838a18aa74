//! Worker body: executes one job end to end.
//!
//! Glues the extractor driver to artifact storage and the job store:
//! transition to processing, run the subprocess with write-through
//! progress, upload the artifact, issue the download URL, and persist
//! the terminal state. Execution errors never reach the submitting
//! client; they are recorded on the job and surfaced via the status
//! endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::dispatch::ProcessJob;
use crate::extractor::Extractor;
use crate::job::{Job, JobStore};
use crate::storage::ArtifactStore;

/// Minimum spacing between repository progress writes per job. A
/// ten-minute download emits hundreds of progress lines; coalescing
/// keeps that to about one write per second.
const PROGRESS_WRITE_INTERVAL: Duration = Duration::from_secs(1);

/// Error classification recorded when the object store fails.
const UPLOAD_ERROR: &str = "UPLOAD_ERROR";

/// Executes jobs handed over by dispatcher workers.
pub struct JobProcessor {
    store: JobStore,
    extractor: Arc<Extractor>,
    artifacts: Arc<dyn ArtifactStore>,
    presign_ttl: Duration,
}

impl JobProcessor {
    /// Creates a processor over the given collaborators.
    #[must_use]
    pub fn new(
        store: JobStore,
        extractor: Arc<Extractor>,
        artifacts: Arc<dyn ArtifactStore>,
        presign_ttl: Duration,
    ) -> Self {
        Self {
            store,
            extractor,
            artifacts,
            presign_ttl,
        }
    }

    /// Spawns the task that drains progress events into throttled
    /// repository writes. The task ends when the sender side is
    /// dropped, flushing and returning the highest observed percent.
    fn spawn_progress_writer(
        &self,
        job_id: String,
        mut rx: mpsc::UnboundedReceiver<u8>,
    ) -> tokio::task::JoinHandle<u8> {
        let store = self.store.clone();
        tokio::spawn(async move {
            let mut last_write: Option<Instant> = None;
            let mut highest: u8 = 0;
            let mut written: u8 = 0;

            while let Some(percent) = rx.recv().await {
                // Progress is monotonic per execution.
                highest = highest.max(percent);

                let due = last_write.is_none_or(|at| at.elapsed() >= PROGRESS_WRITE_INTERVAL);
                if due && highest > written {
                    if let Err(err) = store.update_progress(&job_id, i64::from(highest)).await {
                        debug!(%job_id, error = %err, "progress write failed");
                    }
                    written = highest;
                    last_write = Some(Instant::now());
                }
            }

            // Flush whatever the throttle held back.
            if highest > written {
                if let Err(err) = store.update_progress(&job_id, i64::from(highest)).await {
                    debug!(%job_id, error = %err, "final progress write failed");
                }
            }

            highest
        })
    }

    /// Persists a terminal state, logging rather than propagating store
    /// failures: the worker has nothing further to do with them.
    async fn persist(&self, job: &Job) {
        if let Err(err) = self.store.update(job).await {
            error!(job_id = %job.id, error = %err, "failed to persist job state");
        }
    }
}

#[async_trait]
impl ProcessJob for JobProcessor {
    #[instrument(skip_all, fields(job_id = %job.id, url = %job.url))]
    async fn process(&self, cancel: CancellationToken, mut job: Job) {
        info!("processing job");

        job.mark_processing();
        self.persist(&job).await;

        let (progress_tx, progress_rx) = mpsc::unbounded_channel::<u8>();
        let writer = self.spawn_progress_writer(job.id.clone(), progress_rx);

        let outcome = self
            .extractor
            .download(&job.url, &cancel, move |percent| {
                let _ = progress_tx.send(percent);
            })
            .await;

        // The progress sender is gone once download returns; wait for
        // the writer to flush before any terminal write, and keep the
        // highest percent on the in-memory job so terminal updates
        // never roll the column backwards.
        job.set_progress(writer.await.unwrap_or(0));

        let extraction = match outcome {
            Ok(extraction) => extraction,
            Err(err) => {
                warn!(error = %err, code = err.code(), "download failed");
                job.mark_error(err.code());
                self.persist(&job).await;
                return;
            }
        };

        if let Some(info) = &extraction.info {
            if !info.title.is_empty() {
                job.title = Some(info.title.clone());
            }
        }
        let artifact_path = extraction.path;
        job.file_path = Some(artifact_path.display().to_string());

        let key = if self.artifacts.is_object_store() {
            format!("{}/{}", job.id, object_key_component(&job, &artifact_path))
        } else {
            artifact_path.display().to_string()
        };

        if let Err(err) = self.artifacts.upload(&artifact_path, &key).await {
            error!(error = %err, "artifact upload failed");
            job.mark_error(UPLOAD_ERROR);
            self.persist(&job).await;
            return;
        }

        if self.artifacts.is_object_store() {
            job.file_key = Some(key.clone());
        }

        let download_url = match self.artifacts.download_url(&key, self.presign_ttl).await {
            Ok(url) => url,
            Err(err) => {
                error!(error = %err, "failed to issue download URL");
                job.mark_error(UPLOAD_ERROR);
                self.persist(&job).await;
                return;
            }
        };

        job.mark_done(download_url);

        if self.artifacts.is_object_store() {
            // The object store holds the artifact now; the local copy
            // can go. Sweeper catches it if this fails.
            if let Err(err) = self.extractor.cleanup(&artifact_path) {
                warn!(error = %err, "failed to remove local artifact after upload");
            }
            job.file_path = None;
        }

        self.persist(&job).await;

        info!(title = job.title.as_deref().unwrap_or(""), "job completed");
    }
}

/// Derives the URL-safe component of the object key from the job title,
/// falling back to the artifact's file name.
///
/// The extractor's titles can contain anything; the object key cannot.
fn object_key_component(job: &Job, artifact_path: &std::path::Path) -> String {
    let title = job.title.as_deref().unwrap_or("");
    let sanitized = sanitize_key_component(title);
    if !sanitized.is_empty() {
        return sanitized;
    }

    artifact_path
        .file_name()
        .and_then(|name| name.to_str())
        .map(sanitize_key_component)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "artifact".to_string())
}

/// Keeps ASCII alphanumerics and `. - _`; everything else becomes `_`.
fn sanitize_key_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}
