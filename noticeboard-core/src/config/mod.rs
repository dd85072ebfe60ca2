//! Configuration management for Noticeboard
//!
//! Settings come from built-in defaults, optionally a TOML file, and then
//! environment overrides of the form `NOTICEBOARD_<SECTION>_<KEY>`.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Smallest RSA modulus accepted for the signing key
pub const MIN_RSA_BITS: usize = 1024;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where keys and records live on disk
    pub storage: StorageConfig,

    /// Signing key parameters
    pub keys: KeyConfig,

    /// Git mirror replication
    pub replication: ReplicationConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Storage layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory; the key and message directories default to children of it
    pub data_dir: PathBuf,

    /// Directory holding `local.pem` / `local.pub`
    pub keys_dir: Option<PathBuf>,

    /// Directory holding one file per record
    pub messages_dir: Option<PathBuf>,
}

/// Signing key configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Modulus size used when a new keypair has to be generated
    pub rsa_bits: usize,
}

/// Replication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Push new records to the git mirror
    pub enabled: bool,

    /// Git working tree; defaults to the data directory
    pub repo_path: Option<PathBuf>,

    /// Remote passed to `git push` (git's default when unset)
    pub remote: Option<String>,

    /// Branch passed to `git push` (git's default when unset)
    pub branch: Option<String>,

    /// Pending pushes held before new ones are dropped
    pub queue_capacity: usize,

    /// How long shutdown waits for queued pushes to finish
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            keys_dir: None,
            messages_dir: None,
        }
    }
}

impl StorageConfig {
    pub fn keys_dir(&self) -> PathBuf {
        self.keys_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("keys"))
    }

    pub fn messages_dir(&self) -> PathBuf {
        self.messages_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("messages"))
    }
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self { rsa_bits: 2048 }
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            repo_path: None,
            remote: None,
            branch: None,
            queue_capacity: 64,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

fn parse_env<T>(name: &str, what: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue(format!("Invalid {}: {}", what, e))),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from defaults plus environment variables
    ///
    /// Environment variables follow the pattern: NOTICEBOARD_<SECTION>_<KEY>
    /// Example: NOTICEBOARD_STORAGE_DATA_DIR=/var/lib/noticeboard
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Overlay `NOTICEBOARD_*` environment variables onto this configuration
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        // Storage
        if let Some(dir) = parse_env::<PathBuf>("NOTICEBOARD_STORAGE_DATA_DIR", "data dir")? {
            self.storage.data_dir = dir;
        }
        if let Some(dir) = parse_env::<PathBuf>("NOTICEBOARD_STORAGE_KEYS_DIR", "keys dir")? {
            self.storage.keys_dir = Some(dir);
        }
        if let Some(dir) =
            parse_env::<PathBuf>("NOTICEBOARD_STORAGE_MESSAGES_DIR", "messages dir")?
        {
            self.storage.messages_dir = Some(dir);
        }

        // Keys
        if let Some(bits) = parse_env("NOTICEBOARD_KEY_BITS", "RSA key size")? {
            self.keys.rsa_bits = bits;
        }

        // Replication
        if let Some(enabled) = parse_env("NOTICEBOARD_REPLICATION_ENABLED", "replication flag")? {
            self.replication.enabled = enabled;
        }
        if let Some(path) =
            parse_env::<PathBuf>("NOTICEBOARD_REPLICATION_REPO_PATH", "repository path")?
        {
            self.replication.repo_path = Some(path);
        }
        if let Some(remote) = parse_env::<String>("NOTICEBOARD_REPLICATION_REMOTE", "remote")? {
            self.replication.remote = Some(remote);
        }
        if let Some(branch) = parse_env::<String>("NOTICEBOARD_REPLICATION_BRANCH", "branch")? {
            self.replication.branch = Some(branch);
        }
        if let Some(capacity) =
            parse_env("NOTICEBOARD_REPLICATION_QUEUE_CAPACITY", "queue capacity")?
        {
            self.replication.queue_capacity = capacity;
        }

        // Logging
        if let Some(level) = parse_env::<String>("NOTICEBOARD_LOG_LEVEL", "log level")? {
            self.logging.level = level;
        }
        if let Some(json) = parse_env("NOTICEBOARD_LOG_JSON", "JSON flag")? {
            self.logging.json_format = json;
        }

        Ok(())
    }

    /// Git working tree used for replication
    pub fn repo_path(&self) -> PathBuf {
        self.replication
            .repo_path
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.clone())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "data_dir must not be empty".to_string(),
            ));
        }

        if self.keys.rsa_bits < MIN_RSA_BITS {
            return Err(ConfigError::ValidationFailed(format!(
                "rsa_bits must be at least {}, got {}",
                MIN_RSA_BITS, self.keys.rsa_bits
            )));
        }

        if self.replication.queue_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "queue_capacity must be greater than 0".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "warning", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;

        Ok(())
    }
}
