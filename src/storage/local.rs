//! Local-disk artifact store.
//!
//! Development-only fallback used when object-store credentials are not
//! configured. `upload` is a no-op and `download_url` returns the local
//! path itself; clients on the same machine can open it directly. This
//! is not a production contract.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use super::{ArtifactStore, StorageError};

/// Artifact store that leaves files where the extractor wrote them.
#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    /// Creates a local store rooted at `dir`.
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Resolves a key against the store directory, refusing escapes.
    fn confined(&self, key: &str) -> Result<PathBuf, StorageError> {
        let candidate = Path::new(key);
        let absolute = std::path::absolute(candidate).map_err(|source| StorageError::Io {
            path: key.to_string(),
            source,
        })?;
        let root = std::path::absolute(&self.dir).map_err(|source| StorageError::Io {
            path: self.dir.display().to_string(),
            source,
        })?;

        if !absolute.starts_with(&root) {
            return Err(StorageError::OutsideDir(key.to_string()));
        }
        Ok(absolute)
    }

    /// Files under the store directory with mtime older than `age`.
    fn aged_files(&self, age: Duration) -> Result<Vec<PathBuf>, StorageError> {
        let threshold = SystemTime::now().checked_sub(age);
        let entries = std::fs::read_dir(&self.dir).map_err(|source| StorageError::Io {
            path: self.dir.display().to_string(),
            source,
        })?;

        let mut aged = Vec::new();
        for entry in entries.flatten() {
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            if threshold.is_some_and(|t| modified < t) {
                aged.push(entry.path());
            }
        }

        Ok(aged)
    }
}

#[async_trait]
impl ArtifactStore for LocalStore {
    fn is_object_store(&self) -> bool {
        false
    }

    async fn upload(&self, path: &Path, _key: &str) -> Result<(), StorageError> {
        // The artifact already lives in the served directory.
        debug!(path = %path.display(), "local store: upload skipped");
        Ok(())
    }

    async fn download_url(&self, key: &str, _ttl: Duration) -> Result<String, StorageError> {
        Ok(key.to_string())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.confined(key)?;
        std::fs::remove_file(&path).map_err(|source| StorageError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|source| StorageError::Io {
            path: self.dir.display().to_string(),
            source,
        })?;

        let mut keys = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let matches = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(prefix));
            if matches {
                keys.push(path.display().to_string());
            }
        }
        Ok(keys)
    }

    async fn list_older_than(&self, age: Duration) -> Result<Vec<String>, StorageError> {
        Ok(self
            .aged_files(age)?
            .into_iter()
            .map(|path| path.display().to_string())
            .collect())
    }

    #[instrument(skip(self))]
    async fn delete_older_than(&self, age: Duration) -> Result<usize, StorageError> {
        let mut deleted = 0;
        for path in self.aged_files(age)? {
            match std::fs::remove_file(&path) {
                Ok(()) => deleted += 1,
                Err(error) => warn!(path = %path.display(), %error, "failed to delete aged file"),
            }
        }

        if deleted > 0 {
            info!(deleted, age_secs = age.as_secs(), "aged local files removed");
        }

        Ok(deleted)
    }
}
