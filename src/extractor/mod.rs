//! Driver for the external media extractor (yt-dlp).
//!
//! Turns a validated URL into a downloaded artifact by launching the
//! extractor subprocess with a locked-down argument vector, scanning its
//! line-oriented output for progress, metadata, and the final artifact
//! path, and classifying failures from stderr.
//!
//! # Execution model
//!
//! The subprocess runs under a 10-minute wall clock (configurable) and
//! the caller's cancellation token. stdout and stderr are drained
//! concurrently so neither OS pipe can fill and stall the child. The
//! extractor's internal retries are the only retry layer; a failed job
//! is never re-run.

mod args;
mod error;
mod output;

pub use error::{classify_stderr, ExtractError};
pub use output::OutputScan;

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::job::VideoInfo;

/// Default filesize cap: 500 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// Default duration cap: 30 minutes.
pub const DEFAULT_MAX_DURATION_SECS: u32 = 1800;

/// Default wall-clock budget for one extraction.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Extractor configuration.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Extractor binary name or path.
    pub binary: String,
    /// Optional ffmpeg location override.
    pub ffmpeg_path: Option<String>,
    /// Directory artifacts are written into.
    pub output_dir: PathBuf,
    /// Maximum artifact size in bytes.
    pub max_file_size: u64,
    /// Maximum media duration in seconds.
    pub max_duration_secs: u32,
    /// Wall-clock budget for the subprocess.
    pub timeout: Duration,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            binary: "yt-dlp".to_string(),
            ffmpeg_path: None,
            output_dir: PathBuf::from("./tmp"),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_duration_secs: DEFAULT_MAX_DURATION_SECS,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Result of one successful extraction.
#[derive(Debug)]
pub struct Extraction {
    /// Metadata parsed from the structured output line, when present.
    pub info: Option<VideoInfo>,
    /// Path of the downloaded artifact.
    pub path: PathBuf,
}

/// The extractor driver.
#[derive(Debug, Clone)]
pub struct Extractor {
    config: ExtractorConfig,
}

impl Extractor {
    /// Creates a driver with the given configuration.
    #[must_use]
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    /// The directory artifacts are written into.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    /// Downloads the media at `url`.
    ///
    /// `on_progress` is invoked with the truncated integer percent for
    /// every progress line the tool emits, and once with 100 after a
    /// clean exit.
    ///
    /// # Errors
    ///
    /// Returns the classified [`ExtractError`]: `Timeout` when the wall
    /// clock expires, `Canceled` on token cancellation, a stderr-derived
    /// class on tool failure, or `PathUnresolved` when a clean exit
    /// leaves no determinable artifact.
    #[instrument(skip(self, cancel, on_progress), fields(url = %url))]
    pub async fn download(
        &self,
        url: &str,
        cancel: &CancellationToken,
        mut on_progress: impl FnMut(u8) + Send,
    ) -> Result<Extraction, ExtractError> {
        std::fs::create_dir_all(&self.config.output_dir).map_err(|source| {
            ExtractError::OutputDir {
                dir: self.config.output_dir.display().to_string(),
                source,
            }
        })?;

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let prefix = format!("{timestamp}_");
        let output_template = self
            .config
            .output_dir
            .join(format!("{prefix}%(id)s.%(ext)s"))
            .display()
            .to_string();

        let argv = args::build_args(&self.config, url, &output_template);
        debug!(binary = %self.config.binary, "launching extractor");

        let mut child = Command::new(&self.config.binary)
            .args(&argv)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExtractError::Spawn { source })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractError::Spawn {
                source: std::io::Error::other("stdout pipe unavailable"),
            })?;
        let stderr = child.stderr.take().ok_or_else(|| ExtractError::Spawn {
            source: std::io::Error::other("stderr pipe unavailable"),
        })?;

        // Drain stderr concurrently; a full pipe would stall the child.
        let stderr_task = tokio::spawn(async move {
            let mut collected = String::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                collected.push_str(&line);
                collected.push('\n');
            }
            collected
        });

        let deadline = tokio::time::sleep(self.config.timeout);
        tokio::pin!(deadline);

        let mut scan = OutputScan::new();
        let mut stdout_lines = BufReader::new(stdout).lines();

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = child.kill().await;
                    return Err(ExtractError::Canceled);
                }
                () = &mut deadline => {
                    warn!(timeout_secs = self.config.timeout.as_secs(), "extractor timed out");
                    let _ = child.kill().await;
                    return Err(ExtractError::Timeout);
                }
                line = stdout_lines.next_line() => match line {
                    Ok(Some(line)) => scan.observe_line(&line, &mut on_progress),
                    Ok(None) | Err(_) => break,
                },
            }
        }

        // stdout is closed; the child exits shortly, still bounded by
        // the same deadline and cancellation scope.
        let status = tokio::select! {
            () = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(ExtractError::Canceled);
            }
            () = &mut deadline => {
                let _ = child.kill().await;
                return Err(ExtractError::Timeout);
            }
            status = child.wait() => status.map_err(|source| ExtractError::Spawn { source })?,
        };

        let stderr_text = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(classify_stderr(&stderr_text));
        }

        on_progress(100);

        let Some(path) = self.resolve_artifact_path(&scan, &prefix) else {
            if scan.filter_skipped {
                return Err(ExtractError::DurationExceeded);
            }
            if scan.size_skipped {
                return Err(ExtractError::SizeExceeded);
            }
            return Err(ExtractError::PathUnresolved);
        };

        if tokio::fs::metadata(&path).await.is_err() {
            warn!(path = %path.display(), "reported artifact missing on disk");
            return Err(ExtractError::PathUnresolved);
        }

        info!(path = %path.display(), "extraction complete");

        Ok(Extraction {
            info: scan.info,
            path,
        })
    }

    /// Resolves the artifact path after a clean exit.
    ///
    /// Preference order: destination captured from output, the metadata
    /// filename joined onto the output directory, then a directory scan
    /// for the run's unique timestamp prefix.
    fn resolve_artifact_path(&self, scan: &OutputScan, prefix: &str) -> Option<PathBuf> {
        if let Some(destination) = &scan.destination {
            return Some(destination.clone());
        }

        if let Some(filename) = scan
            .info
            .as_ref()
            .and_then(|info| info.filename.as_deref())
            .filter(|name| !name.is_empty())
        {
            return Some(self.config.output_dir.join(filename));
        }

        std::fs::read_dir(&self.config.output_dir)
            .ok()?
            .flatten()
            .map(|entry| entry.path())
            .find(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(prefix))
            })
    }

    /// Deletes a local artifact, refusing paths that escape the output
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::OutsideOutputDir`] for confined-path
    /// violations and [`ExtractError::Cleanup`] for IO failures.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn cleanup(&self, path: &Path) -> Result<(), ExtractError> {
        if path.as_os_str().is_empty() {
            return Ok(());
        }

        let absolute = std::path::absolute(path).map_err(|source| ExtractError::Cleanup {
            path: path.to_path_buf(),
            source,
        })?;
        let absolute_dir =
            std::path::absolute(&self.config.output_dir).map_err(|source| {
                ExtractError::Cleanup {
                    path: self.config.output_dir.clone(),
                    source,
                }
            })?;

        if !absolute.starts_with(&absolute_dir) {
            return Err(ExtractError::OutsideOutputDir { path: absolute });
        }

        std::fs::remove_file(&absolute).map_err(|source| ExtractError::Cleanup {
            path: absolute.clone(),
            source,
        })
    }

    /// Verifies the extractor binary is installed and runnable.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Spawn`] when the binary cannot be
    /// launched, or [`ExtractError::Failed`] when it exits non-zero.
    pub async fn check_binary(&self) -> Result<(), ExtractError> {
        let output = Command::new(&self.config.binary)
            .arg("--version")
            .output()
            .await
            .map_err(|source| ExtractError::Spawn { source })?;

        if !output.status.success() {
            return Err(ExtractError::failed(&String::from_utf8_lossy(
                &output.stderr,
            )));
        }

        Ok(())
    }
}
