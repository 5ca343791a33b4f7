//! # AES-256-GCM Sealing
//!
//! The sealed co-processor stores every plaintext amount as an AES-256-GCM
//! ciphertext under its own key. This module is the only place that talks
//! to `aes-gcm`.
//!
//! ## Nonce management
//!
//! GCM is unforgiving about nonce reuse under one key: two messages with the
//! same (key, nonce) leak their XOR and let an attacker forge tags. Every
//! seal draws a fresh random 96-bit nonce from `OsRng`. That also gives us
//! re-randomisation for free: sealing the same amount twice never produces
//! the same bytes.
//!
//! ## Wire format
//!
//! `seal()` returns `nonce || ciphertext || tag`. `open()` expects exactly
//! that. The associated data is authenticated but not stored; the caller
//! must supply the same AAD on both sides.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use thiserror::Error;

use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH, AES_TAG_LENGTH};

/// Errors from sealing or opening.
///
/// Deliberately vague: "wrong key" and "tampered ciphertext" look the same
/// from the outside.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncryptionError {
    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed -- wrong key, wrong context or corrupted ciphertext")]
    DecryptFailed,

    #[error("sealed data too short: need at least {} bytes", AES_NONCE_LENGTH + AES_TAG_LENGTH)]
    CiphertextTooShort,
}

/// Draw a fresh random AES-256 key.
pub fn generate_key() -> [u8; AES_KEY_LENGTH] {
    let mut key = [0u8; AES_KEY_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

/// Seal `plaintext` under `key`, authenticating `aad` alongside it.
pub fn seal(
    key: &[u8; AES_KEY_LENGTH],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::EncryptFailed)?;

    let mut nonce_bytes = [0u8; AES_NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|_| EncryptionError::EncryptFailed)?;

    let mut out = Vec::with_capacity(AES_NONCE_LENGTH + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open data produced by [`seal`] with the same key and AAD.
pub fn open(
    key: &[u8; AES_KEY_LENGTH],
    sealed: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    if sealed.len() < AES_NONCE_LENGTH + AES_TAG_LENGTH {
        return Err(EncryptionError::CiphertextTooShort);
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(AES_NONCE_LENGTH);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::DecryptFailed)?;
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad })
        .map_err(|_| EncryptionError::DecryptFailed)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
