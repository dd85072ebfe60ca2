//! Replication error types

use std::path::PathBuf;
use thiserror::Error;

/// Reasons replication cannot be enabled at all
///
/// Raised once, at startup. The board keeps working locally when this
/// happens; only the push to the shared repository is lost.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetupError {
    #[error("Not a git repository: {0}")]
    NotARepository(PathBuf),

    #[error("Git identity is not configured (missing {0})")]
    IdentityMissing(String),

    #[error("Git is not available: {0}")]
    GitUnavailable(String),
}

/// Failure of a single replication step
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("Failed to run git: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("`git {command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Backend error: {0}")]
    Backend(String),
}

pub type ReplicationResult<T> = Result<T, ReplicationError>;
