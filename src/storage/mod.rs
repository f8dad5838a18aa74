//! Artifact storage.
//!
//! The job processor and retention sweeper depend on the
//! [`ArtifactStore`] capability set, not on a concrete backend. Two
//! variants exist: [`R2Store`] against an S3-compatible object store and
//! [`LocalStore`], a development-only stand-in that leaves artifacts on
//! the local disk.

mod local;
mod r2;

pub use local::LocalStore;
pub use r2::{R2Config, R2Store};

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from artifact storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend configuration is missing required values.
    #[error("incomplete storage configuration: {0}")]
    Config(String),

    /// Local file could not be read or removed.
    #[error("storage IO error for {path}: {source}")]
    Io {
        /// Path involved in the failure.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Upload to the backend failed.
    #[error("failed to upload {key}: {message}")]
    Upload {
        /// Object key.
        key: String,
        /// Backend error text.
        message: String,
    },

    /// Presigned URL generation failed.
    #[error("failed to presign {key}: {message}")]
    Presign {
        /// Object key.
        key: String,
        /// Backend error text.
        message: String,
    },

    /// Object deletion failed.
    #[error("failed to delete {key}: {message}")]
    Delete {
        /// Object key.
        key: String,
        /// Backend error text.
        message: String,
    },

    /// Object listing failed.
    #[error("failed to list objects: {0}")]
    List(String),

    /// Refusal to touch a path outside the configured directory.
    #[error("path escapes storage directory: {0}")]
    OutsideDir(String),
}

/// Capability set the processor and sweeper rely on.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// True for real object-store backends. Drives key construction and
    /// local-artifact cleanup in the processor; the local variant keeps
    /// the artifact in place because the returned URL points at it.
    fn is_object_store(&self) -> bool;

    /// Uploads a local file under the given key.
    async fn upload(&self, path: &Path, key: &str) -> Result<(), StorageError>;

    /// Issues a time-limited URL for fetching the object.
    async fn download_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;

    /// Deletes one object.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Lists keys under a prefix.
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Lists keys of objects older than `age`.
    async fn list_older_than(&self, age: Duration) -> Result<Vec<String>, StorageError>;

    /// Deletes objects older than `age`, returning the count removed.
    async fn delete_older_than(&self, age: Duration) -> Result<usize, StorageError>;
}

/// MIME type for an artifact, from its file extension.
#[must_use]
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "m4a" => "audio/mp4",
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_content_type_known_extensions() {
        let cases = [
            ("clip.mp4", "video/mp4"),
            ("clip.webm", "video/webm"),
            ("clip.mkv", "video/x-matroska"),
            ("track.m4a", "audio/mp4"),
            ("track.mp3", "audio/mpeg"),
            ("track.flac", "audio/flac"),
            ("track.wav", "audio/wav"),
        ];
        for (name, expected) in cases {
            assert_eq!(content_type_for(&PathBuf::from(name)), expected, "{name}");
        }
    }

    #[test]
    fn test_content_type_unknown_defaults_to_octet_stream() {
        assert_eq!(
            content_type_for(&PathBuf::from("file.xyz")),
            "application/octet-stream"
        );
        assert_eq!(
            content_type_for(&PathBuf::from("no_extension")),
            "application/octet-stream"
        );
    }

    #[test]
    fn test_content_type_is_case_insensitive() {
        assert_eq!(content_type_for(&PathBuf::from("CLIP.MP4")), "video/mp4");
    }
}
