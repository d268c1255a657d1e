//! AES-256-GCM record cipher.
//!
//! A ready-made [`Cipher`] implementation for at-rest encryption. Each
//! record payload is sealed with a fresh random 96-bit nonce, stored in
//! front of the ciphertext:
//!
//! ```text
//! [nonce:12][ciphertext + tag:16]
//! ```
//!
//! The stored record size grows by 28 bytes per record; the engine's slot
//! arithmetic works on the sealed length, so nothing else changes.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use halite_storage::{Cipher, CipherError};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

const NONCE_LEN: usize = 12;

/// AES-256-GCM [`Cipher`] keyed directly or from a passphrase.
pub struct Aes256GcmCipher {
    cipher: Aes256Gcm,
}

impl Aes256GcmCipher {
    /// Uses a raw 256-bit key.
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(key.into()),
        }
    }

    /// Derives the key as SHA-256 of a passphrase.
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let key: [u8; 32] = digest.into();
        Self::new(&key)
    }
}

impl Cipher for Aes256GcmCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .expect("AES-GCM encryption is infallible for in-memory payloads");

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        sealed
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        if ciphertext.len() < NONCE_LEN {
            return Err(CipherError::new("sealed payload shorter than the nonce"));
        }
        let (nonce_bytes, body) = ciphertext.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), body)
            .map_err(|_| CipherError::new("wrong key or corrupted ciphertext"))
    }
}
