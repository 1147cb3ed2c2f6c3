//! Cryptographic primitives for clipsync.
//!
//! This module provides:
//! - Password key derivation (SHA-256, deterministic, no salt)
//! - ChaCha20-Poly1305 (IETF) authenticated encryption with 96-bit random nonces
//! - [`CryptoBox`] sealing clipboard payloads into `nonce || ciphertext+tag` frames
//!
//! # Security Notes
//!
//! - Every seal draws a fresh random 12-byte nonce from the OS
//! - A failed open is the only signal that peers use different passwords
//! - Keys are zeroized on drop and never appear in debug output

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Nonce size for ChaCha20-Poly1305 (96 bits = 12 bytes).
pub const NONCE_SIZE: usize = 12;

/// Key size for ChaCha20-Poly1305 (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// Authentication tag size appended by the AEAD.
pub const TAG_SIZE: usize = 16;

/// Crypto errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed (authentication error).
    ///
    /// Covers truncated frames, wrong keys and tampering alike.
    #[error("decryption failed: authentication error")]
    DecryptionFailed,
}

/// The 32-byte symmetric key shared by every peer that knows the password.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedKey([u8; KEY_SIZE]);

impl SharedKey {
    /// Derive the key from a password: `SHA-256(password)`.
    ///
    /// Same password always yields the same key.
    pub fn from_password(password: &str) -> Self {
        let digest = Sha256::digest(password.as_bytes());
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create a random key (for testing).
    pub fn random() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

// Don't leak keys in debug output
impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedKey([REDACTED])")
    }
}

/// Seals and opens data-plane frames with a [`SharedKey`].
///
/// Stateless apart from the key; safe to share across tasks.
#[derive(Clone)]
pub struct CryptoBox {
    cipher: ChaCha20Poly1305,
}

impl CryptoBox {
    /// Create a box for the given key.
    pub fn new(key: &SharedKey) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key.as_bytes())),
        }
    }

    /// Derive the key from a password and create a box for it.
    pub fn from_password(password: &str) -> Self {
        Self::new(&SharedKey::from_password(password))
    }

    /// Encrypt `plaintext` into `nonce || ciphertext+tag`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce_bytes).expect("getrandom failed");

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| CryptoError::EncryptionFailed("aead encrypt failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Split off the nonce and decrypt + authenticate the remainder.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);

        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

impl std::fmt::Debug for CryptoBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CryptoBox {{ key: [REDACTED] }}")
    }
}

/// Encrypt `plaintext` with `key` into `nonce || ciphertext+tag`.
pub fn encrypt(plaintext: &[u8], key: &SharedKey) -> Result<Vec<u8>, CryptoError> {
    CryptoBox::new(key).seal(plaintext)
}

/// Decrypt a frame produced by [`encrypt`].
pub fn decrypt(sealed: &[u8], key: &SharedKey) -> Result<Vec<u8>, CryptoError> {
    CryptoBox::new(key).open(sealed)
}
