//! The at-rest encryption seam.
//!
//! The engine never chooses a cipher; callers hand one in at create/open
//! time and the record codec wraps each record's nullmask+fields payload
//! through it. Ciphertext length becomes the stored record size, so ciphers
//! may expand the payload (nonces, tags) freely.

use std::fmt;

/// Encrypts and decrypts record payloads.
///
/// Implementations must be deterministic-agnostic: the engine never assumes
/// `encrypt` is repeatable, only that `decrypt(encrypt(p)) == p`.
pub trait Cipher: Send + Sync {
    /// Encrypts one record payload.
    fn encrypt(&self, plaintext: &[u8]) -> Vec<u8>;

    /// Decrypts one record payload.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError>;
}

impl fmt::Debug for dyn Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cipher")
    }
}

/// A cipher failed to decrypt a payload (wrong key, corrupt ciphertext).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cipher failure: {reason}")]
pub struct CipherError {
    pub reason: String,
}

impl CipherError {
    /// Builds an error with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}
