//! Retention sweeper.
//!
//! Two independent background tasks enforce the artifact TTL: a local
//! sweep deleting aged files from the extractor's output directory, and
//! an object-store sweep delegating to
//! [`ArtifactStore::delete_older_than`]. Each task is skipped silently
//! when its dependency is absent. The local sweep runs once immediately
//! on startup to catch leftovers from a previous run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::storage::ArtifactStore;

/// Default local sweep cadence: 5 minutes.
pub const DEFAULT_LOCAL_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default local artifact TTL: 30 minutes.
pub const DEFAULT_LOCAL_MAX_AGE: Duration = Duration::from_secs(30 * 60);

/// Default object-store sweep cadence: 30 minutes.
pub const DEFAULT_REMOTE_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Default object-store artifact TTL: 60 minutes.
pub const DEFAULT_REMOTE_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// Sweeper wiring.
#[derive(Clone)]
pub struct SweeperConfig {
    /// Output directory to sweep; `None` disables the local sweep.
    pub local_dir: Option<PathBuf>,
    /// Local artifact TTL.
    pub local_max_age: Duration,
    /// Local sweep cadence.
    pub local_interval: Duration,
    /// Object store to sweep; `None` disables the remote sweep.
    pub remote: Option<Arc<dyn ArtifactStore>>,
    /// Remote artifact TTL.
    pub remote_max_age: Duration,
    /// Remote sweep cadence.
    pub remote_interval: Duration,
}

/// Periodic retention enforcement over local disk and the object store.
pub struct Sweeper {
    config: SweeperConfig,
}

impl Sweeper {
    /// Creates a sweeper with the given wiring.
    #[must_use]
    pub fn new(config: SweeperConfig) -> Self {
        Self { config }
    }

    /// Spawns the background sweep tasks. Tasks run until `cancel`.
    ///
    /// Returns the spawned handles so shutdown can join them.
    pub fn start(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if let Some(dir) = self.config.local_dir.clone() {
            if !self.config.local_interval.is_zero() {
                info!(
                    dir = %dir.display(),
                    max_age_secs = self.config.local_max_age.as_secs(),
                    interval_secs = self.config.local_interval.as_secs(),
                    "starting local sweep"
                );
                handles.push(tokio::spawn(run_local_sweep(
                    dir,
                    self.config.local_max_age,
                    self.config.local_interval,
                    cancel.clone(),
                )));
            }
        }

        if let Some(store) = self.config.remote.clone() {
            if !self.config.remote_interval.is_zero() {
                info!(
                    max_age_secs = self.config.remote_max_age.as_secs(),
                    interval_secs = self.config.remote_interval.as_secs(),
                    "starting object-store sweep"
                );
                handles.push(tokio::spawn(run_remote_sweep(
                    store,
                    self.config.remote_max_age,
                    self.config.remote_interval,
                    cancel.clone(),
                )));
            }
        }

        handles
    }
}

/// Local sweep loop. The interval's first tick fires immediately, which
/// gives the startup catch-up run.
async fn run_local_sweep(
    dir: PathBuf,
    max_age: Duration,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let deleted = sweep_local(&dir, max_age);
                if deleted > 0 {
                    info!(deleted, dir = %dir.display(), "local sweep completed");
                }
            }
        }
    }
}

/// Object-store sweep loop. Unlike the local sweep there is no startup
/// run; the first sweep happens after one full interval.
async fn run_remote_sweep(
    store: Arc<dyn ArtifactStore>,
    max_age: Duration,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    // Discard the interval's immediate first tick.
    tokio::select! {
        () = cancel.cancelled() => return,
        _ = ticker.tick() => {}
    }

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(err) = store.delete_older_than(max_age).await {
                    error!(error = %err, "object-store sweep failed");
                }
            }
        }
    }
}

/// Deletes regular files under `dir` whose mtime is older than
/// `max_age`. Returns the number of files removed.
#[instrument(skip(dir), fields(dir = %dir.display()))]
pub fn sweep_local(dir: &Path, max_age: Duration) -> usize {
    let threshold = SystemTime::now().checked_sub(max_age);
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            // Missing directory just means nothing has been downloaded yet.
            if err.kind() != std::io::ErrorKind::NotFound {
                error!(error = %err, "failed to open directory for sweep");
            }
            return 0;
        }
    };

    let mut deleted = 0;
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
            match std::fs::remove_file(entry.path()) {
                Ok(()) => deleted += 1,
                Err(err) => {
                    warn!(path = %entry.path().display(), error = %err, "failed to delete aged file");
                }
            }
        }
    }

    deleted
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_sweep_local_removes_only_aged_files() {
        let tmp = tempfile::tempdir().unwrap();
        let aged = tmp.path().join("old.mp4");
        std::fs::write(&aged, b"x").unwrap();

        std::thread::sleep(Duration::from_millis(60));
        let fresh = tmp.path().join("new.mp4");
        std::fs::write(&fresh, b"x").unwrap();

        let deleted = sweep_local(tmp.path(), Duration::from_millis(30));

        assert_eq!(deleted, 1);
        assert!(!aged.exists());
        assert!(fresh.exists());
    }

    #[test]
    fn test_sweep_local_skips_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let subdir = tmp.path().join("nested");
        std::fs::create_dir(&subdir).unwrap();
        std::thread::sleep(Duration::from_millis(30));

        sweep_local(tmp.path(), Duration::from_millis(1));
        assert!(subdir.exists());
    }

    #[test]
    fn test_sweep_local_missing_dir_is_silent() {
        assert_eq!(
            sweep_local(Path::new("/nonexistent/sweep-target"), Duration::ZERO),
            0
        );
    }

    struct CountingStore {
        sweeps: AtomicUsize,
    }

    #[async_trait]
    impl ArtifactStore for CountingStore {
        fn is_object_store(&self) -> bool {
            true
        }
        async fn upload(
            &self,
            _path: &Path,
            _key: &str,
        ) -> Result<(), crate::storage::StorageError> {
            Ok(())
        }
        async fn download_url(
            &self,
            key: &str,
            _ttl: Duration,
        ) -> Result<String, crate::storage::StorageError> {
            Ok(key.to_string())
        }
        async fn delete(&self, _key: &str) -> Result<(), crate::storage::StorageError> {
            Ok(())
        }
        async fn list_by_prefix(
            &self,
            _prefix: &str,
        ) -> Result<Vec<String>, crate::storage::StorageError> {
            Ok(Vec::new())
        }
        async fn list_older_than(
            &self,
            _age: Duration,
        ) -> Result<Vec<String>, crate::storage::StorageError> {
            Ok(Vec::new())
        }
        async fn delete_older_than(
            &self,
            _age: Duration,
        ) -> Result<usize, crate::storage::StorageError> {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_remote_sweep_fires_on_interval_and_stops_on_cancel() {
        let store = Arc::new(CountingStore {
            sweeps: AtomicUsize::new(0),
        });
        let sweeper = Sweeper::new(SweeperConfig {
            local_dir: None,
            local_max_age: DEFAULT_LOCAL_MAX_AGE,
            local_interval: DEFAULT_LOCAL_INTERVAL,
            remote: Some(Arc::clone(&store) as Arc<dyn ArtifactStore>),
            remote_max_age: Duration::from_secs(60),
            remote_interval: Duration::from_millis(25),
        });

        let cancel = CancellationToken::new();
        let handles = sweeper.start(&cancel);
        assert_eq!(handles.len(), 1, "only the remote task should start");

        tokio::time::sleep(Duration::from_millis(120)).await;
        cancel.cancel();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .unwrap()
                .unwrap();
        }

        assert!(store.sweeps.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_local_sweep_runs_immediately_on_start() {
        let tmp = tempfile::tempdir().unwrap();
        let leftover = tmp.path().join("leftover.mp4");
        std::fs::write(&leftover, b"x").unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let sweeper = Sweeper::new(SweeperConfig {
            local_dir: Some(tmp.path().to_path_buf()),
            local_max_age: Duration::from_millis(10),
            // Long interval: only the immediate startup run can fire.
            local_interval: Duration::from_secs(3600),
            remote: None,
            remote_max_age: DEFAULT_REMOTE_MAX_AGE,
            remote_interval: DEFAULT_REMOTE_INTERVAL,
        });

        let cancel = CancellationToken::new();
        let handles = sweeper.start(&cancel);

        tokio::time::timeout(Duration::from_secs(2), async {
            while leftover.exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_no_dependencies_starts_nothing() {
        let sweeper = Sweeper::new(SweeperConfig {
            local_dir: None,
            local_max_age: DEFAULT_LOCAL_MAX_AGE,
            local_interval: DEFAULT_LOCAL_INTERVAL,
            remote: None,
            remote_max_age: DEFAULT_REMOTE_MAX_AGE,
            remote_interval: DEFAULT_REMOTE_INTERVAL,
        });

        let cancel = CancellationToken::new();
        assert!(sweeper.start(&cancel).is_empty());
    }
}
