//! In-memory VCS backend
//!
//! Records every operation instead of touching a repository. Individual
//! steps can be made to fail and every call can be slowed down, which is
//! enough to exercise the replication worker from unit and integration
//! tests.

use super::backend::VcsBackend;
use super::errors::{ReplicationError, ReplicationResult, SetupError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One recorded backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VcsOp {
    Stage(PathBuf),
    Commit(String),
    Push,
}

/// The step a [`VcsOp`] belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VcsStep {
    Stage,
    Commit,
    Push,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    ops: Mutex<Vec<VcsOp>>,
    failing: Mutex<Vec<VcsStep>>,
    setup_error: Option<SetupError>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `error` from `check_setup`
    pub fn with_setup_error(mut self, error: SetupError) -> Self {
        self.setup_error = Some(error);
        self
    }

    /// Sleep for `delay` inside every operation
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make every later call of `step` fail
    pub fn fail_on(&self, step: VcsStep) {
        lock(&self.failing).push(step);
    }

    /// Let `step` succeed again
    pub fn recover(&self, step: VcsStep) {
        lock(&self.failing).retain(|s| *s != step);
    }

    /// Successful operations in the order they happened
    pub fn operations(&self) -> Vec<VcsOp> {
        lock(&self.ops).clone()
    }

    /// Commit messages of records that made it all the way through push
    pub fn pushed_commits(&self) -> Vec<String> {
        let mut pushed = Vec::new();
        let mut last_commit = None;
        for op in lock(&self.ops).iter() {
            match op {
                VcsOp::Commit(message) => last_commit = Some(message.clone()),
                VcsOp::Push => pushed.extend(last_commit.take()),
                VcsOp::Stage(_) => {}
            }
        }
        pushed
    }

    /// Highest number of operations that ever ran at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn perform(&self, step: VcsStep, op: VcsOp) -> ReplicationResult<()> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let result = if lock(&self.failing).contains(&step) {
            Err(ReplicationError::Backend(format!("{:?} failed", step)))
        } else {
            lock(&self.ops).push(op);
            Ok(())
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[async_trait]
impl VcsBackend for MemoryBackend {
    async fn check_setup(&self) -> Result<(), SetupError> {
        match &self.setup_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn stage(&self, path: &Path) -> ReplicationResult<()> {
        self.perform(VcsStep::Stage, VcsOp::Stage(path.to_path_buf()))
            .await
    }

    async fn commit(&self, message: &str) -> ReplicationResult<()> {
        self.perform(VcsStep::Commit, VcsOp::Commit(message.to_string()))
            .await
    }

    async fn push(&self) -> ReplicationResult<()> {
        self.perform(VcsStep::Push, VcsOp::Push).await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
