//! Error types and stderr classification for the extractor driver.
//!
//! Failures are classified by scanning the tool's stderr for fixed
//! substrings. The exact substrings are part of the contract with the
//! external tool version; the mapping lives in one table so a tool
//! upgrade only touches [`STDERR_PATTERNS`].

use std::path::PathBuf;

use thiserror::Error;

/// Cap on stderr detail carried into a generic download error.
const STDERR_DETAIL_MAX_CHARS: usize = 200;

/// Errors from one extractor execution.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The subprocess exceeded its wall-clock budget.
    #[error("download timed out")]
    Timeout,

    /// The surrounding context was cancelled (shutdown).
    #[error("download was canceled")]
    Canceled,

    /// The platform reports the media unavailable or private.
    #[error("video is unavailable or private")]
    VideoUnavailable,

    /// The media exceeds the configured filesize cap.
    #[error("file exceeds the maximum allowed size")]
    SizeExceeded,

    /// The media exceeds the configured duration cap.
    #[error("video exceeds the maximum allowed duration")]
    DurationExceeded,

    /// The tool rejected the URL outright.
    #[error("invalid video URL")]
    InvalidUrl,

    /// Generic tool failure, carrying truncated stderr.
    #[error("extractor failed: {detail}")]
    Failed {
        /// First part of the tool's stderr.
        detail: String,
    },

    /// The artifact path could not be determined after a clean exit.
    #[error("could not determine downloaded file path")]
    PathUnresolved,

    /// The subprocess could not be started.
    #[error("failed to launch extractor: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The output directory could not be created.
    #[error("failed to create output directory {dir}: {source}")]
    OutputDir {
        /// The directory that could not be created.
        dir: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Refusal to delete a file outside the output directory.
    #[error("refusing to delete file outside output directory: {path}")]
    OutsideOutputDir {
        /// The offending path.
        path: PathBuf,
    },

    /// Local artifact deletion failed.
    #[error("failed to remove artifact {path}: {source}")]
    Cleanup {
        /// The artifact path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl ExtractError {
    /// Builds the generic failure from raw stderr, truncated to a
    /// readable prefix.
    #[must_use]
    pub fn failed(stderr: &str) -> Self {
        let trimmed = stderr.trim();
        let detail: String = trimmed.chars().take(STDERR_DETAIL_MAX_CHARS).collect();
        Self::Failed {
            detail: if detail.is_empty() {
                "extractor produced no diagnostics".to_string()
            } else {
                detail
            },
        }
    }

    /// Machine-readable classification stored on the job row and exposed
    /// through the status endpoint.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout => "TIMEOUT",
            Self::Canceled => "CANCELED",
            Self::VideoUnavailable => "VIDEO_UNAVAILABLE",
            Self::SizeExceeded => "SIZE_EXCEEDED",
            Self::DurationExceeded => "DURATION_EXCEEDED",
            Self::InvalidUrl => "INVALID_URL",
            Self::Failed { .. }
            | Self::PathUnresolved
            | Self::Spawn { .. }
            | Self::OutputDir { .. }
            | Self::OutsideOutputDir { .. }
            | Self::Cleanup { .. } => "DOWNLOAD_ERROR",
        }
    }
}

/// What a stderr substring means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StderrClass {
    VideoUnavailable,
    InvalidUrl,
    SizeExceeded,
    DurationExceeded,
}

/// Substring → classification contract with the extractor tool.
/// Order matters: the first matching pattern wins.
const STDERR_PATTERNS: &[(&str, StderrClass)] = &[
    ("Video unavailable", StderrClass::VideoUnavailable),
    ("private", StderrClass::VideoUnavailable),
    ("is not a valid URL", StderrClass::InvalidUrl),
    ("does not pass filter", StderrClass::DurationExceeded),
    ("filesize", StderrClass::SizeExceeded),
];

/// Classifies a failed run from its accumulated stderr.
///
/// Unmatched stderr becomes the generic [`ExtractError::Failed`] with a
/// truncated detail string.
#[must_use]
pub fn classify_stderr(stderr: &str) -> ExtractError {
    for (pattern, class) in STDERR_PATTERNS {
        if stderr.contains(pattern) {
            return match class {
                StderrClass::VideoUnavailable => ExtractError::VideoUnavailable,
                StderrClass::InvalidUrl => ExtractError::InvalidUrl,
                StderrClass::SizeExceeded => ExtractError::SizeExceeded,
                StderrClass::DurationExceeded => ExtractError::DurationExceeded,
            };
        }
    }

    ExtractError::failed(stderr)
}
