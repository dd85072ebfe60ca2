/*
    errors.rs - Error types for the message store

    ValidationError is the client-fault class: bad content or type.
    StoreError wraps it together with the local storage failures.
    RecordError describes why a file on disk is not a valid record; it is
    only ever logged, never returned from `list`.
*/

use thiserror::Error;

/// Rejected input to `save`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Nothing left to post once control characters and whitespace are gone
    #[error("Content must be a non-empty string")]
    Empty,

    /// Input bytes are not UTF-8
    #[error("Content must be text")]
    NotText,

    #[error("Message too long ({size} bytes, maximum {limit})")]
    TooLarge { size: usize, limit: usize },

    #[error("Invalid message type: {0}")]
    InvalidType(String),
}

/// Errors that can occur when saving a record
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),

    /// A record already exists for this second; records are never overwritten
    #[error("Record already exists: {0}")]
    Duplicate(String),

    #[error("Invalid record identifier: {0}")]
    InvalidIdentifier(String),
}

impl StoreError {
    /// Whether the caller is at fault (bad content or type)
    pub fn is_client_error(&self) -> bool {
        matches!(self, StoreError::Validation(_))
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Reasons a stored file fails to parse as a record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("missing blank line between headers and content")]
    MissingSeparator,

    #[error("header line {line} has no ':'")]
    MalformedHeader { line: usize },

    #[error("header line {line} has an empty key")]
    EmptyKey { line: usize },

    #[error("duplicate header '{0}'")]
    DuplicateHeader(String),

    #[error("missing header '{0}'")]
    MissingHeader(&'static str),

    #[error("invalid value for '{header}': {value}")]
    InvalidValue { header: &'static str, value: String },
}
