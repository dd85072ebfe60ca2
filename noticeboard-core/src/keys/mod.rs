//! Signing key management
//!
//! One RSA keypair per deployment, stored as PEM next to each other:
//!
//! ```text
//! <keys_dir>/local.pem   PKCS#8 private key (PKCS#1 also accepted on load)
//! <keys_dir>/local.pub   SubjectPublicKeyInfo public key
//! ```
//!
//! Signatures are RSASSA-PKCS1-v1_5 over a SHA-256 digest, the same scheme
//! `openssl dgst -sha256 -sign` produces, so keys and signatures made with
//! the openssl tool remain valid.

use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

mod error;
mod fingerprint;

pub use error::{KeyError, KeyResult};
pub use fingerprint::{Fingerprint, FINGERPRINT_LEN};

const PRIVATE_KEY_FILE: &str = "local.pem";
const PUBLIC_KEY_FILE: &str = "local.pub";

/// Locations of the key files inside the keys directory
#[derive(Debug, Clone)]
pub struct KeyPaths {
    pub private_key: PathBuf,
    pub public_key: PathBuf,
}

impl KeyPaths {
    pub fn new(keys_dir: &Path) -> Self {
        Self {
            private_key: keys_dir.join(PRIVATE_KEY_FILE),
            public_key: keys_dir.join(PUBLIC_KEY_FILE),
        }
    }
}

/// Owns the active keypair; signs and verifies message content
pub struct KeyManager {
    keys_dir: PathBuf,
    rsa_bits: usize,
    signing_key: SigningKey<Sha256>,
    verifying_key: VerifyingKey<Sha256>,
    public_key_pem: String,
    fingerprint: Fingerprint,
}

impl KeyManager {
    /// Make sure a keypair exists in `keys_dir`, generating one if needed
    ///
    /// Returns `true` when a new keypair was written. The private key is
    /// installed with a hard link, which refuses to replace an existing file,
    /// so two processes starting at once end up sharing whichever key landed
    /// first.
    pub fn ensure_key_pair(keys_dir: &Path, rsa_bits: usize) -> KeyResult<bool> {
        fs::create_dir_all(keys_dir)?;
        let paths = KeyPaths::new(keys_dir);

        if paths.private_key.exists() {
            if !paths.public_key.exists() {
                warn!(path = %paths.public_key.display(), "Public key missing, deriving it from the private key");
                let private = read_private_key(&paths.private_key)?;
                write_atomic(&paths.public_key, encode_public_key(&private)?.as_bytes())?;
            }
            return Ok(false);
        }

        info!(bits = rsa_bits, dir = %keys_dir.display(), "Generating RSA keypair");
        let private = RsaPrivateKey::new(&mut OsRng, rsa_bits)?;
        let private_pem = encode_private_key(&private)?;

        let staging = temp_path(&paths.private_key);
        write_private_file(&staging, private_pem.as_bytes())?;
        let installed = fs::hard_link(&staging, &paths.private_key);
        let _ = fs::remove_file(&staging);

        match installed {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                warn!("Another process generated a keypair first, keeping it");
                return Self::ensure_key_pair(keys_dir, rsa_bits);
            }
            Err(e) => return Err(e.into()),
        }

        write_atomic(&paths.public_key, encode_public_key(&private)?.as_bytes())?;
        Ok(true)
    }

    /// Ensure a keypair exists, then load it and cache its fingerprint
    pub fn open(keys_dir: impl Into<PathBuf>, rsa_bits: usize) -> KeyResult<Self> {
        let keys_dir = keys_dir.into();
        Self::ensure_key_pair(&keys_dir, rsa_bits)?;
        Self::load(keys_dir, rsa_bits)
    }

    fn load(keys_dir: PathBuf, rsa_bits: usize) -> KeyResult<Self> {
        let paths = KeyPaths::new(&keys_dir);
        let private = read_private_key(&paths.private_key)?;

        let public_bytes = fs::read(&paths.public_key)?;
        let public_key_pem = String::from_utf8(public_bytes)
            .map_err(|e| KeyError::Encoding(format!("public key is not UTF-8: {}", e)))?;
        let public = RsaPublicKey::from_public_key_pem(&public_key_pem)
            .map_err(|e| KeyError::Encoding(format!("public key: {}", e)))?;

        if RsaPublicKey::from(&private) != public {
            return Err(KeyError::Mismatch(paths.public_key.display().to_string()));
        }

        let fingerprint = Fingerprint::of_public_key(public_key_pem.as_bytes());
        debug!(%fingerprint, "Loaded signing key");

        Ok(Self {
            keys_dir,
            rsa_bits,
            signing_key: SigningKey::<Sha256>::new(private),
            verifying_key: VerifyingKey::<Sha256>::new(public),
            public_key_pem,
            fingerprint,
        })
    }

    /// Replace the keypair on disk with a freshly generated one
    ///
    /// Records signed with the previous key no longer verify afterwards.
    pub fn regenerate(&mut self) -> KeyResult<()> {
        let paths = KeyPaths::new(&self.keys_dir);
        let previous = self.fingerprint.clone();

        let private = RsaPrivateKey::new(&mut OsRng, self.rsa_bits)?;
        write_private_file_atomic(&paths.private_key, encode_private_key(&private)?.as_bytes())?;
        write_atomic(&paths.public_key, encode_public_key(&private)?.as_bytes())?;

        *self = Self::load(self.keys_dir.clone(), self.rsa_bits)?;
        info!(%previous, current = %self.fingerprint, "Signing key regenerated");
        Ok(())
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    pub fn keys_dir(&self) -> &Path {
        &self.keys_dir
    }

    /// Detached signature over `content`, hex encoded
    pub fn sign(&self, content: &[u8]) -> String {
        let signature: Signature = self.signing_key.sign(content);
        hex::encode(signature.to_bytes())
    }

    /// Check a hex signature against `content`
    ///
    /// Any failure (bad hex, wrong length, mismatch) is reported as `false`.
    pub fn verify(&self, content: &[u8], signature_hex: &str) -> bool {
        let raw = match hex::decode(signature_hex.trim()) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(error = %e, "Signature is not valid hex");
                return false;
            }
        };

        let signature = match Signature::try_from(raw.as_slice()) {
            Ok(signature) => signature,
            Err(e) => {
                debug!(error = %e, "Malformed signature");
                return false;
            }
        };

        match self.verifying_key.verify(content, &signature) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Signature verification failed");
                false
            }
        }
    }
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManager")
            .field("keys_dir", &self.keys_dir)
            .field("fingerprint", &self.fingerprint)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

fn encode_private_key(private: &RsaPrivateKey) -> KeyResult<Zeroizing<String>> {
    private
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| KeyError::Encoding(format!("private key: {}", e)))
}

fn encode_public_key(private: &RsaPrivateKey) -> KeyResult<String> {
    RsaPublicKey::from(private)
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| KeyError::Encoding(format!("public key: {}", e)))
}

fn read_private_key(path: &Path) -> KeyResult<RsaPrivateKey> {
    let pem = Zeroizing::new(fs::read_to_string(path)?);
    RsaPrivateKey::from_pkcs8_pem(&pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(&pem))
        .map_err(|e| KeyError::Encoding(format!("private key {}: {}", path.display(), e)))
}

/// Create a new file readable only by the owner
fn write_private_file(path: &Path, data: &[u8]) -> KeyResult<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}

fn write_private_file_atomic(path: &Path, data: &[u8]) -> KeyResult<()> {
    let temp = temp_path(path);
    write_private_file(&temp, data)?;
    fs::rename(temp, path)?;
    Ok(())
}

/// Write file atomically (write to temp, then rename)
fn write_atomic(path: &Path, data: &[u8]) -> KeyResult<()> {
    let temp = temp_path(path);
    fs::write(&temp, data)?;
    fs::rename(temp, path)?;
    Ok(())
}

/// Sibling of `path` no other writer, thread or process, will pick
fn temp_path(path: &Path) -> PathBuf {
    let suffix: u64 = rand::random();
    path.with_extension(format!("{:016x}.tmp", suffix))
}
