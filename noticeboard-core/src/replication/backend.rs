//! Version-control backends
//!
//! The worker only needs four operations from the shared repository. They
//! sit behind [`VcsBackend`] so the queue logic can be tested against
//! [`MemoryBackend`](super::memory::MemoryBackend) without a git binary.

use super::errors::{ReplicationError, ReplicationResult, SetupError};
use crate::config::ReplicationConfig;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::debug;

/// Operations replication performs against a repository
#[async_trait]
pub trait VcsBackend: Send + Sync {
    /// Confirm the repository exists and commits can be authored
    async fn check_setup(&self) -> Result<(), SetupError>;

    async fn stage(&self, path: &Path) -> ReplicationResult<()>;

    async fn commit(&self, message: &str) -> ReplicationResult<()>;

    async fn push(&self) -> ReplicationResult<()>;
}

/// Shells out to the `git` binary inside `repo_path`
#[derive(Debug, Clone)]
pub struct GitBackend {
    repo_path: PathBuf,
    remote: Option<String>,
    branch: Option<String>,
}

impl GitBackend {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        GitBackend {
            repo_path: repo_path.into(),
            remote: None,
            branch: None,
        }
    }

    /// Push to `remote` (and optionally `branch`) instead of git's default
    pub fn with_remote(mut self, remote: impl Into<String>, branch: Option<String>) -> Self {
        self.remote = Some(remote.into());
        self.branch = branch;
        self
    }

    pub fn from_config(config: &ReplicationConfig, default_repo: &Path) -> Self {
        let backend = GitBackend::new(config.repo_path.as_deref().unwrap_or(default_repo));
        match &config.remote {
            Some(remote) => backend.with_remote(remote.clone(), config.branch.clone()),
            None => backend,
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    fn push_args(&self) -> Vec<&str> {
        let mut args = vec!["push"];
        if let Some(remote) = &self.remote {
            args.push(remote);
            if let Some(branch) = &self.branch {
                args.push(branch);
            }
        }
        args
    }

    async fn output(&self, args: &[&str]) -> std::io::Result<Output> {
        debug!(repo = %self.repo_path.display(), "git {}", args.join(" "));
        Command::new("git")
            .args(args)
            .current_dir(&self.repo_path)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .output()
            .await
    }

    async fn run(&self, args: &[&str]) -> ReplicationResult<()> {
        let output = self.output(args).await?;
        if output.status.success() {
            return Ok(());
        }
        Err(ReplicationError::CommandFailed {
            command: args.join(" "),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    async fn require_identity(&self, key: &str) -> Result<(), SetupError> {
        let output = self
            .output(&["config", key])
            .await
            .map_err(|e| SetupError::GitUnavailable(e.to_string()))?;

        if output.status.success() && !String::from_utf8_lossy(&output.stdout).trim().is_empty() {
            Ok(())
        } else {
            Err(SetupError::IdentityMissing(key.to_string()))
        }
    }
}

#[async_trait]
impl VcsBackend for GitBackend {
    async fn check_setup(&self) -> Result<(), SetupError> {
        if !self.repo_path.join(".git").exists() {
            return Err(SetupError::NotARepository(self.repo_path.clone()));
        }
        self.require_identity("user.name").await?;
        self.require_identity("user.email").await
    }

    async fn stage(&self, path: &Path) -> ReplicationResult<()> {
        let path = path.to_string_lossy();
        self.run(&["add", "--", path.as_ref()]).await
    }

    async fn commit(&self, message: &str) -> ReplicationResult<()> {
        self.run(&["commit", "-m", message]).await
    }

    async fn push(&self) -> ReplicationResult<()> {
        self.run(&self.push_args()).await
    }
}
