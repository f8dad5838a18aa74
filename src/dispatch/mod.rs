//! Dispatcher: bounded job queue feeding a fixed worker pool.
//!
//! Admission control lives here. `enqueue` never blocks: a full queue is
//! reported immediately as [`DispatchError::QueueFull`], which the HTTP
//! layer maps to 503. This is the backpressure contract: the system
//! never accepts work it cannot queue on the spot.
//!
//! Workers are long-lived tasks blocking on a shared receiver. They stop
//! on the dispatcher's cancellation token (itself a child of the
//! process-wide token) or when the queue is closed by [`Dispatcher::stop`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::job::Job;

/// Default number of workers.
pub const DEFAULT_WORKERS: usize = 3;

/// Default queue capacity.
pub const DEFAULT_QUEUE_SIZE: usize = 10;

/// Errors from job admission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The queue is at capacity.
    #[error("job queue is full")]
    QueueFull,

    /// The dispatcher has been stopped; no new work is accepted.
    #[error("dispatcher has been stopped")]
    Stopped,
}

/// Seam between the dispatcher and the job execution logic.
///
/// Workers invoke this once per dequeued job. The token is the
/// dispatcher's cancellation scope; implementations propagate it into
/// anything abortable (the extractor subprocess in production).
#[async_trait]
pub trait ProcessJob: Send + Sync {
    async fn process(&self, cancel: CancellationToken, job: Job);
}

/// Bounded queue plus fixed worker pool.
pub struct Dispatcher {
    tx: std::sync::Mutex<Option<mpsc::Sender<Job>>>,
    rx: std::sync::Mutex<Option<mpsc::Receiver<Job>>>,
    handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
    workers: usize,
    capacity: usize,
    stopped: AtomicBool,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.workers)
            .field("capacity", &self.capacity)
            .field("stopped", &self.stopped.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher with the given pool size and queue capacity.
    /// Values below 1 are clamped to 1.
    #[must_use]
    pub fn new(workers: usize, queue_size: usize) -> Self {
        let workers = workers.max(1);
        let capacity = queue_size.max(1);
        let (tx, rx) = mpsc::channel(capacity);

        Self {
            tx: std::sync::Mutex::new(Some(tx)),
            rx: std::sync::Mutex::new(Some(rx)),
            handles: tokio::sync::Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            workers,
            capacity,
            stopped: AtomicBool::new(false),
        }
    }

    /// Spawns the worker pool. Subsequent calls are no-ops.
    ///
    /// Workers terminate on `parent` cancellation, on [`Self::stop`], or
    /// when the queue is closed and drained.
    #[instrument(skip_all, fields(workers = self.workers, queue_size = self.capacity))]
    pub async fn start(&self, processor: Arc<dyn ProcessJob>, parent: &CancellationToken) {
        let Some(rx) = self.rx.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take()
        else {
            warn!("dispatcher already started");
            return;
        };

        info!("starting dispatcher");

        // Tie the worker scope to both the process token and stop().
        let cancel = self.cancel.clone();
        let parent = parent.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = parent.cancelled() => cancel.cancel(),
                () = cancel.cancelled() => {}
            }
        });

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let mut handles = self.handles.lock().await;

        for worker_id in 0..self.workers {
            let rx = Arc::clone(&rx);
            let cancel = self.cancel.clone();
            let processor = Arc::clone(&processor);

            handles.push(tokio::spawn(async move {
                debug!(worker_id, "worker started");
                loop {
                    let received = tokio::select! {
                        () = cancel.cancelled() => {
                            debug!(worker_id, "worker stopping (cancelled)");
                            break;
                        }
                        received = async { rx.lock().await.recv().await } => received,
                    };

                    let Some(job) = received else {
                        debug!(worker_id, "worker stopping (queue closed)");
                        break;
                    };

                    debug!(worker_id, job_id = %job.id, url = %job.url, "worker picked up job");
                    processor.process(cancel.child_token(), job).await;
                }
            }));
        }
    }

    /// Adds a job to the queue without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Stopped`] after [`Self::stop`], or
    /// [`DispatchError::QueueFull`] when the queue is at capacity.
    pub fn enqueue(&self, job: Job) -> Result<(), DispatchError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(DispatchError::Stopped);
        }

        let guard = self
            .tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return Err(DispatchError::Stopped);
        };

        match tx.try_send(job) {
            Ok(()) => {
                debug!(queue_size = self.queue_len(), "job enqueued");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(job_id = %job.id, "queue is full");
                Err(DispatchError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DispatchError::Stopped),
        }
    }

    /// Stops the dispatcher: refuses new enqueues, closes the queue,
    /// signals the workers, and waits for them to return. Idempotent.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("stopping dispatcher");

        self.cancel.cancel();
        self.tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();

        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            if let Err(error) = handle.await {
                warn!(%error, "worker task panicked");
            }
        }

        info!("dispatcher stopped");
    }

    /// Current number of queued (not yet picked up) jobs.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        let guard = self
            .tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard
            .as_ref()
            .map_or(0, |tx| tx.max_capacity() - tx.capacity())
    }

    /// Queue capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True when the queue has no free slot.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.queue_len() >= self.capacity
    }

    /// Number of workers in the pool.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers
    }
}
