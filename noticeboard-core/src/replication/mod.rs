//! Best-effort replication of new records to a shared git repository
//!
//! `MessageStore` hands each written file to a [`ReplicationHandle`], which
//! only enqueues it. A single background worker drains the queue and runs
//! stage, commit and push for one record at a time, so repository
//! operations never overlap. A failed step is logged and the record is not
//! retried; the local copy is already durable.
//!
//! ```text
//! save() --try_send--> [bounded queue] --> worker --> stage -> commit -> push
//! ```
//!
//! On a graceful shutdown signal the worker stops accepting work and
//! finishes what is already queued. On an immediate signal it abandons the
//! queue.

mod backend;
mod errors;
mod memory;

pub use backend::{GitBackend, VcsBackend};
pub use errors::{ReplicationError, ReplicationResult, SetupError};
pub use memory::{MemoryBackend, VcsOp, VcsStep};

use crate::config::ReplicationConfig;
use crate::shutdown::ShutdownSignal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A record waiting to be replicated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationJob {
    pub locator: PathBuf,
}

impl ReplicationJob {
    pub fn identifier(&self) -> String {
        self.locator
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.locator.display().to_string())
    }

    pub fn commit_message(&self) -> String {
        format!("Add message {}", self.identifier())
    }
}

/// Outcome counts reported by the worker when it exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub replicated: usize,
    pub failed: usize,
    pub abandoned: usize,
}

/// Cheap, cloneable sender side of the replication queue
#[derive(Debug, Clone)]
pub struct ReplicationHandle {
    tx: mpsc::Sender<ReplicationJob>,
}

impl ReplicationHandle {
    /// Queue `locator` for replication without waiting
    ///
    /// Returns whether the job was accepted. A full queue or a stopped
    /// worker drops the job with a warning.
    pub fn replicate(&self, locator: impl Into<PathBuf>) -> bool {
        let job = ReplicationJob {
            locator: locator.into(),
        };
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                warn!(record = %job.identifier(), "Replication queue full, record will not be pushed");
                false
            }
            Err(TrySendError::Closed(job)) => {
                warn!(record = %job.identifier(), "Replication stopped, record will not be pushed");
                false
            }
        }
    }
}

/// Owns the replication worker
pub struct ReplicationManager {
    handle: ReplicationHandle,
    worker: JoinHandle<WorkerStats>,
}

impl ReplicationManager {
    /// Check the backend and start the worker
    ///
    /// The worker listens on `shutdown` for the signal to drain or abandon
    /// its queue. Fails without spawning anything if the backend is not
    /// usable.
    pub async fn start(
        config: &ReplicationConfig,
        backend: Arc<dyn VcsBackend>,
        shutdown: broadcast::Receiver<ShutdownSignal>,
    ) -> Result<Self, SetupError> {
        backend.check_setup().await?;

        let queue_capacity = config.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(queue_capacity);
        let worker = tokio::spawn(run_worker(backend, rx, shutdown));
        info!(queue_capacity, "Replication started");

        Ok(ReplicationManager {
            handle: ReplicationHandle { tx },
            worker,
        })
    }

    pub fn handle(&self) -> ReplicationHandle {
        self.handle.clone()
    }

    /// Wait up to `timeout` for the worker to exit
    ///
    /// Call after broadcasting a shutdown signal. Returns `None` if the
    /// worker had to be aborted.
    pub async fn wait(self, timeout: Duration) -> Option<WorkerStats> {
        let ReplicationManager { handle, mut worker } = self;
        drop(handle);

        match tokio::time::timeout(timeout, &mut worker).await {
            Ok(Ok(stats)) => {
                info!(
                    replicated = stats.replicated,
                    failed = stats.failed,
                    abandoned = stats.abandoned,
                    "Replication stopped"
                );
                Some(stats)
            }
            Ok(Err(e)) => {
                error!(error = %e, "Replication worker panicked");
                None
            }
            Err(_) => {
                warn!(?timeout, "Replication did not finish in time, abandoning queue");
                worker.abort();
                None
            }
        }
    }
}

async fn run_worker(
    backend: Arc<dyn VcsBackend>,
    mut rx: mpsc::Receiver<ReplicationJob>,
    mut shutdown: broadcast::Receiver<ShutdownSignal>,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    let mut listening = true;

    loop {
        tokio::select! {
            biased;

            signal = shutdown.recv(), if listening => match signal {
                Ok(ShutdownSignal::Immediate) => {
                    rx.close();
                    while rx.try_recv().is_ok() {
                        stats.abandoned += 1;
                    }
                    warn!(abandoned = stats.abandoned, "Immediate shutdown, abandoning replication queue");
                    break;
                }
                Ok(ShutdownSignal::Graceful) | Err(RecvError::Lagged(_)) => {
                    rx.close();
                    info!("Draining replication queue");
                    while let Some(job) = rx.recv().await {
                        process(backend.as_ref(), &job, &mut stats).await;
                    }
                    break;
                }
                Err(RecvError::Closed) => {
                    // Nobody can signal anymore; run until the handles go away
                    listening = false;
                }
            },
            job = rx.recv() => match job {
                Some(job) => process(backend.as_ref(), &job, &mut stats).await,
                None => {
                    debug!("All replication handles dropped");
                    break;
                }
            },
        }
    }

    stats
}

async fn process(backend: &dyn VcsBackend, job: &ReplicationJob, stats: &mut WorkerStats) {
    match replicate(backend, job).await {
        Ok(()) => {
            stats.replicated += 1;
            info!(record = %job.identifier(), "Replicated record");
        }
        Err((step, e)) => {
            stats.failed += 1;
            error!(record = %job.identifier(), step, error = %e, "Replication failed");
        }
    }
}

async fn replicate(
    backend: &dyn VcsBackend,
    job: &ReplicationJob,
) -> Result<(), (&'static str, ReplicationError)> {
    backend.stage(&job.locator).await.map_err(|e| ("stage", e))?;
    backend
        .commit(&job.commit_message())
        .await
        .map_err(|e| ("commit", e))?;
    backend.push().await.map_err(|e| ("push", e))
}

/// Start replication for `repo` if it is usable
///
/// Logs and returns `None` when setup fails, leaving the caller to run
/// local-only.
pub async fn start_if_available(
    config: &ReplicationConfig,
    backend: Arc<dyn VcsBackend>,
    repo: &Path,
    shutdown: broadcast::Receiver<ShutdownSignal>,
) -> Option<ReplicationManager> {
    match ReplicationManager::start(config, backend, shutdown).await {
        Ok(manager) => Some(manager),
        Err(e) => {
            warn!(repo = %repo.display(), error = %e, "Replication disabled");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (broadcast::Sender<ShutdownSignal>, broadcast::Receiver<ShutdownSignal>) {
        broadcast::channel(4)
    }

    fn queue(capacity: usize) -> ReplicationConfig {
        ReplicationConfig {
            queue_capacity: capacity,
            ..Default::default()
        }
    }

    async fn settle(manager: ReplicationManager, tx: &broadcast::Sender<ShutdownSignal>) -> WorkerStats {
        tx.send(ShutdownSignal::Graceful).unwrap();
        manager.wait(Duration::from_secs(5)).await.unwrap()
    }

    #[test]
    fn test_job_commit_message() {
        let job = ReplicationJob {
            locator: PathBuf::from("/data/messages/20240501_010203.txt"),
        };
        assert_eq!(job.identifier(), "20240501_010203.txt");
        assert_eq!(job.commit_message(), "Add message 20240501_010203.txt");
    }

    #[tokio::test]
    async fn test_setup_error_prevents_start() {
        let backend = Arc::new(
            MemoryBackend::new().with_setup_error(SetupError::IdentityMissing("user.name".into())),
        );
        let (_tx, rx) = channel();
        let result = ReplicationManager::start(&queue(4), backend, rx).await;
        assert!(matches!(result, Err(SetupError::IdentityMissing(_))));
    }

    #[tokio::test]
    async fn test_start_if_available_falls_back() {
        let backend = Arc::new(
            MemoryBackend::new().with_setup_error(SetupError::NotARepository("/tmp/x".into())),
        );
        let (_tx, rx) = channel();
        assert!(start_if_available(&queue(4), backend, Path::new("/tmp/x"), rx).await.is_none());
    }

    #[tokio::test]
    async fn test_jobs_run_in_order() {
        let backend = Arc::new(MemoryBackend::new());
        let (tx, rx) = channel();
        let manager = ReplicationManager::start(&queue(8), backend.clone(), rx).await.unwrap();
        let handle = manager.handle();

        assert!(handle.replicate("/m/a.txt"));
        assert!(handle.replicate("/m/b.txt"));

        let stats = settle(manager, &tx).await;
        assert_eq!(stats.replicated, 2);
        assert_eq!(
            backend.operations(),
            vec![
                VcsOp::Stage(PathBuf::from("/m/a.txt")),
                VcsOp::Commit("Add message a.txt".into()),
                VcsOp::Push,
                VcsOp::Stage(PathBuf::from("/m/b.txt")),
                VcsOp::Commit("Add message b.txt".into()),
                VcsOp::Push,
            ]
        );
    }

    #[tokio::test]
    async fn test_operations_never_overlap() {
        let backend = Arc::new(MemoryBackend::new().with_delay(Duration::from_millis(5)));
        let (tx, rx) = channel();
        let manager = ReplicationManager::start(&queue(16), backend.clone(), rx).await.unwrap();

        let handles: Vec<_> = (0..4).map(|_| manager.handle()).collect();
        let mut tasks = Vec::new();
        for (i, handle) in handles.into_iter().enumerate() {
            tasks.push(tokio::spawn(async move {
                handle.replicate(format!("/m/{}.txt", i))
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap());
        }

        let stats = settle(manager, &tx).await;
        assert_eq!(stats.replicated, 4);
        assert_eq!(backend.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_failed_step_skips_the_rest() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_on(VcsStep::Commit);
        let (tx, rx) = channel();
        let manager = ReplicationManager::start(&queue(8), backend.clone(), rx).await.unwrap();

        manager.handle().replicate("/m/a.txt");
        let stats = settle(manager, &tx).await;

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.replicated, 0);
        assert_eq!(backend.operations(), vec![VcsOp::Stage(PathBuf::from("/m/a.txt"))]);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_worker() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_on(VcsStep::Push);
        let (tx, rx) = channel();
        let manager = ReplicationManager::start(&queue(8), backend.clone(), rx).await.unwrap();
        let handle = manager.handle();

        handle.replicate("/m/a.txt");
        tokio::time::sleep(Duration::from_millis(50)).await;
        backend.recover(VcsStep::Push);
        handle.replicate("/m/b.txt");

        let stats = settle(manager, &tx).await;
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.replicated, 1);
        assert_eq!(backend.pushed_commits(), vec!["Add message b.txt"]);
    }

    #[tokio::test]
    async fn test_full_queue_drops_job() {
        let backend = Arc::new(MemoryBackend::new().with_delay(Duration::from_millis(50)));
        let (tx, rx) = channel();
        let manager = ReplicationManager::start(&queue(1), backend.clone(), rx).await.unwrap();
        let handle = manager.handle();

        let accepted = (0..10)
            .map(|i| handle.replicate(format!("/m/{}.txt", i)))
            .filter(|accepted| *accepted)
            .count();
        assert!(accepted < 10);

        let stats = settle(manager, &tx).await;
        assert_eq!(stats.replicated, accepted);
    }

    #[tokio::test]
    async fn test_graceful_shutdown_drains_queue() {
        let backend = Arc::new(MemoryBackend::new().with_delay(Duration::from_millis(5)));
        let (tx, rx) = channel();
        let manager = ReplicationManager::start(&queue(16), backend.clone(), rx).await.unwrap();
        let handle = manager.handle();

        for i in 0..5 {
            assert!(handle.replicate(format!("/m/{}.txt", i)));
        }
        let stats = settle(manager, &tx).await;

        assert_eq!(stats.replicated, 5);
        assert_eq!(backend.pushed_commits().len(), 5);
        assert!(!handle.replicate("/m/late.txt"));
    }

    #[tokio::test]
    async fn test_immediate_shutdown_abandons_queue() {
        let backend = Arc::new(MemoryBackend::new().with_delay(Duration::from_millis(100)));
        let (tx, rx) = channel();
        let manager = ReplicationManager::start(&queue(16), backend.clone(), rx).await.unwrap();
        let handle = manager.handle();

        for i in 0..5 {
            handle.replicate(format!("/m/{}.txt", i));
        }
        tx.send(ShutdownSignal::Immediate).unwrap();
        let stats = manager.wait(Duration::from_secs(5)).await.unwrap();

        assert!(stats.replicated < 5);
        assert_eq!(stats.replicated + stats.failed + stats.abandoned, 5);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let backend = Arc::new(MemoryBackend::new().with_delay(Duration::from_secs(10)));
        let (tx, rx) = channel();
        let manager = ReplicationManager::start(&queue(4), backend, rx).await.unwrap();
        manager.handle().replicate("/m/slow.txt");

        tx.send(ShutdownSignal::Graceful).unwrap();
        assert!(manager.wait(Duration::from_millis(50)).await.is_none());
    }

    #[tokio::test]
    async fn test_closed_shutdown_channel_keeps_worker_running() {
        let backend = Arc::new(MemoryBackend::new());
        let (tx, rx) = channel();
        let manager = ReplicationManager::start(&queue(4), backend.clone(), rx).await.unwrap();
        drop(tx);

        let handle = manager.handle();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.replicate("/m/a.txt"));
        drop(handle);

        let stats = manager.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(stats.replicated, 1);
    }
}
