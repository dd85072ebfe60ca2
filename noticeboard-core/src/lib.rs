//! Noticeboard core
//!
//! A signed bulletin board: every posted message is signed with the
//! deployment's RSA key, written as one immutable text file, and optionally
//! pushed to a shared git repository in the background.

pub mod config;
pub mod keys;
pub mod logging;
pub mod replication;
pub mod shutdown;
pub mod store;

pub use config::{Config, ConfigError};
pub use keys::{Fingerprint, KeyError, KeyManager};
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogLevel};
pub use replication::{GitBackend, ReplicationHandle, ReplicationManager, SetupError, VcsBackend};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
pub use store::{MessageStore, MessageType, Record, StoreError, ValidationError};
