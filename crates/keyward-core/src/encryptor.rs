//! AES-256-GCM over [`SymmetricKey`]s.
//!
//! A fresh random nonce is prepended to every ciphertext, so the payload is
//! `nonce || ciphertext || tag` and callers never manage nonces themselves.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use thiserror::Error;

use crate::key::SymmetricKey;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncryptionError {
    #[error("encrypt failed: {0}")]
    Cipher(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecryptionError {
    #[error("payload too short: {len} bytes, need at least {}", NONCE_LEN + TAG_LEN)]
    Truncated { len: usize },
    /// Wrong key or tampered payload. Nothing is released.
    #[error("authentication failed")]
    Authentication,
}

/// Sealed bytes produced by [`encrypt`]. Opaque beyond storage and transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload(Vec<u8>);

impl EncryptedPayload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for EncryptedPayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for EncryptedPayload {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Encrypt `data` under `key` with a fresh nonce.
pub fn encrypt(data: &[u8], key: &SymmetricKey) -> Result<EncryptedPayload, EncryptionError> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, data)
        .map_err(|e| EncryptionError::Cipher(e.to_string()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&ciphertext);
    Ok(EncryptedPayload(out))
}

/// Authenticate and decrypt a payload produced by [`encrypt`].
pub fn decrypt(payload: impl AsRef<[u8]>, key: &SymmetricKey) -> Result<Vec<u8>, DecryptionError> {
    let payload = payload.as_ref();
    if payload.len() < NONCE_LEN + TAG_LEN {
        return Err(DecryptionError::Truncated { len: payload.len() });
    }

    let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| DecryptionError::Authentication)
}
