/*
    message_store.rs - Signed, write-once message records

    Every `save` produces one file named after the second it was created in.
    Files are created with create-new semantics and never rewritten.
    `list` reads the whole directory back; a damaged file is logged and
    skipped so one bad record cannot hide the others.
*/

use super::errors::{StoreError, StoreResult};
use super::record::{format_date, identifier_for, MessageType, Record, RECORD_EXTENSION};
use super::validator::sanitize;
use crate::keys::KeyManager;
use crate::replication::ReplicationHandle;
use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Persists and enumerates signed records
pub struct MessageStore {
    messages_dir: PathBuf,
    keys: Arc<KeyManager>,
    replicator: Option<ReplicationHandle>,
}

impl MessageStore {
    /// Open the store, creating the messages directory if needed
    pub fn new(messages_dir: impl Into<PathBuf>, keys: Arc<KeyManager>) -> StoreResult<Self> {
        let messages_dir = messages_dir.into();
        fs::create_dir_all(&messages_dir)?;

        Ok(MessageStore {
            messages_dir,
            keys,
            replicator: None,
        })
    }

    /// Hand every new record to `replicator` after it is written
    pub fn with_replication(mut self, replicator: ReplicationHandle) -> Self {
        self.replicator = Some(replicator);
        self
    }

    pub fn messages_dir(&self) -> &Path {
        &self.messages_dir
    }

    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    /// Path a record with this identifier is stored at
    pub fn locator(&self, identifier: &str) -> PathBuf {
        self.messages_dir.join(identifier)
    }

    /// Save `content` with a textual type (`message`, `system` or `error`)
    pub fn save(&self, content: &str, kind: &str) -> StoreResult<String> {
        let kind: MessageType = kind.parse()?;
        self.save_at(content, kind, Utc::now())
    }

    pub fn save_typed(&self, content: &str, kind: MessageType) -> StoreResult<String> {
        self.save_at(content, kind, Utc::now())
    }

    /// Save as if the current time were `at`
    ///
    /// Returns the new record's identifier. Fails with
    /// [`StoreError::Duplicate`] if a record for the same second exists.
    pub fn save_at(&self, content: &str, kind: MessageType, at: DateTime<Utc>) -> StoreResult<String> {
        let content = sanitize(content)?;
        let identifier = identifier_for(&at);

        let record = Record {
            identifier: identifier.clone(),
            date: format_date(&at),
            kind,
            fingerprint: self.keys.fingerprint().clone(),
            signature: self.keys.sign(content.as_bytes()),
            content,
        };

        let path = self.locator(&identifier);
        write_new(&path, record.render().as_bytes()).map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => StoreError::Duplicate(identifier.clone()),
            _ => StoreError::Io(e),
        })?;

        info!(record = %identifier, kind = %kind, bytes = record.content.len(), "Saved record");

        if let Some(replicator) = &self.replicator {
            replicator.replicate(path);
        }

        Ok(identifier)
    }

    /// All readable records, oldest first
    ///
    /// Never fails: unreadable or malformed files are logged and skipped.
    pub fn list(&self) -> Vec<Record> {
        let entries = match fs::read_dir(&self.messages_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.messages_dir.display(), error = %e, "Cannot read messages directory");
                return Vec::new();
            }
        };

        let mut records = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };
            if !is_record_file(&path) {
                continue;
            }
            if let Some(record) = self.load(&path) {
                records.push(record);
            }
        }

        records.sort_by(|a, b| {
            a.date
                .cmp(&b.date)
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        debug!(count = records.len(), "Listed records");
        records
    }

    /// Load one record by identifier
    ///
    /// `Ok(None)` when there is no such record or it fails to parse.
    pub fn get(&self, identifier: &str) -> StoreResult<Option<Record>> {
        if !is_valid_identifier(identifier) {
            return Err(StoreError::InvalidIdentifier(identifier.to_string()));
        }
        let path = self.locator(identifier);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(self.load(&path))
    }

    /// Whether the record was signed by the active key and is unmodified
    pub fn verify_record(&self, record: &Record) -> bool {
        if &record.fingerprint != self.keys.fingerprint() {
            debug!(
                record = %record.identifier,
                fingerprint = %record.fingerprint,
                "Record signed by a different key"
            );
            return false;
        }
        self.keys.verify(record.content.as_bytes(), &record.signature)
    }

    fn load(&self, path: &Path) -> Option<Record> {
        let identifier = path.file_name()?.to_string_lossy().into_owned();

        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!(record = %identifier, error = %e, "Skipping unreadable record");
                return None;
            }
        };

        match Record::parse(identifier.as_str(), &text) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(record = %identifier, error = %e, "Skipping malformed record");
                None
            }
        }
    }
}

fn is_record_file(path: &Path) -> bool {
    path.is_file() && path.extension().and_then(|ext| ext.to_str()) == Some(RECORD_EXTENSION)
}

fn is_valid_identifier(identifier: &str) -> bool {
    !identifier.is_empty()
        && !identifier.starts_with('.')
        && !identifier.contains(|c| c == '/' || c == '\\')
        && identifier.ends_with(&format!(".{}", RECORD_EXTENSION))
}

/// Create `path` (failing if it exists), write it fully and flush to disk
fn write_new(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let written = file.write_all(data).and_then(|_| file.sync_all());
    if written.is_err() {
        // Never leave a half-written record behind
        drop(file);
        let _ = fs::remove_file(path);
    }
    written
}
