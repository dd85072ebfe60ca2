//! Key management errors

use thiserror::Error;

/// Errors raised while creating, loading or replacing the signing keypair
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("RSA error: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("Key encoding error: {0}")]
    Encoding(String),

    #[error("Public key {0} does not belong to the private key")]
    Mismatch(String),

    #[error("Invalid fingerprint: {0}")]
    InvalidFingerprint(String),
}

pub type KeyResult<T> = Result<T, KeyError>;
