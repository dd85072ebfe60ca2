//! Message storage
//!
//! Validation of user input, the on-disk record format, and the store that
//! signs, writes and enumerates records.

pub mod errors;
mod message_store;
pub mod record;
pub mod validator;

pub use errors::{RecordError, StoreError, StoreResult, ValidationError};
pub use message_store::MessageStore;
pub use record::{MessageType, Record};
pub use validator::{sanitize, sanitize_bytes, MAX_CONTENT_BYTES};
