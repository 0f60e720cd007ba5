// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Owner-keyed credential cipher.
//!
//! ## Key Derivation
//!
//! The encryption key is derived from the owner's wallet address with
//! PBKDF2-HMAC-SHA256 over a fresh random salt, so the service never stores
//! a key: only a caller who can reproduce the owner identity can re-derive
//! it. The address is public knowledge, which is why plaintext recovery is
//! additionally gated behind a signed challenge (see [`super::gate`]).
//!
//! ## Wire Format
//!
//! `ciphertext = base64(nonce || AES-256-GCM(secret))`, salt stored
//! separately as base64. A fresh salt and nonce are generated per call;
//! a nonce is never reused under a given key.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::OwnerAddress;

/// Salt size for key derivation (16 bytes / 128 bits).
const SALT_SIZE: usize = 16;

/// Nonce size for AES-256-GCM (12 bytes / 96 bits).
const NONCE_SIZE: usize = 12;

/// GCM authentication tag size.
const TAG_SIZE: usize = 16;

/// Derived key size (32 bytes / 256 bits).
const KEY_SIZE: usize = 32;

/// PBKDF2 iteration count. Deliberately slow; the derivation input is a
/// public wallet address, so brute-force hardening matters.
const PBKDF2_ITERATIONS: u32 = 310_000;

/// Errors from credential encryption/decryption.
///
/// `Decryption` deliberately does not distinguish a wrong owner from
/// corrupted data: an attacker holding ciphertext must learn nothing from
/// the failure mode.
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("malformed credential input: {0}")]
    MalformedInput(String),

    #[error("credential decryption failed")]
    Decryption,

    #[error("credential encryption failed")]
    Encryption,
}

/// An encrypted gateway credential as stored at rest.
///
/// Immutable once created: re-issuing a credential produces a new
/// `ProtectedCredential`, it never mutates an existing one.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct ProtectedCredential {
    /// base64(nonce || ciphertext), self-contained for decryption.
    pub ciphertext: String,
    /// base64 key-derivation salt.
    pub salt: String,
    /// The owner the key was derived from. Stored for bookkeeping only;
    /// decryption always uses the caller-supplied identity.
    pub owner: OwnerAddress,
}

/// Derive the 256-bit AEAD key from an owner address and salt.
fn derive_key(owner: &str, salt: &[u8]) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(owner.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// Encrypt a gateway credential under a key derived from `owner`.
///
/// Generates a fresh salt and nonce per call, so two encryptions of the
/// same secret never produce identical output.
pub fn encrypt(secret: &str, owner: &OwnerAddress) -> Result<ProtectedCredential, CipherError> {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(owner.as_str(), &salt);
    let cipher = Aes256Gcm::new(&key.into());

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), secret.as_bytes())
        .map_err(|_| CipherError::Encryption)?;

    let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);

    Ok(ProtectedCredential {
        ciphertext: BASE64.encode(&combined),
        salt: BASE64.encode(salt),
        owner: owner.clone(),
    })
}

/// Decrypt a stored credential with a key re-derived from `owner`.
///
/// Fails with [`CipherError::MalformedInput`] on undecodable or truncated
/// input, and with [`CipherError::Decryption`] when authentication fails
/// (wrong owner, wrong salt, or tampered ciphertext — indistinguishable).
pub fn decrypt(
    ciphertext_b64: &str,
    salt_b64: &str,
    owner: &OwnerAddress,
) -> Result<String, CipherError> {
    let combined = BASE64
        .decode(ciphertext_b64)
        .map_err(|e| CipherError::MalformedInput(format!("ciphertext is not valid base64: {e}")))?;
    let salt = BASE64
        .decode(salt_b64)
        .map_err(|e| CipherError::MalformedInput(format!("salt is not valid base64: {e}")))?;

    if salt.len() != SALT_SIZE {
        return Err(CipherError::MalformedInput(format!(
            "salt must be {SALT_SIZE} bytes, got {}",
            salt.len()
        )));
    }
    if combined.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CipherError::MalformedInput(
            "ciphertext shorter than nonce + tag".to_string(),
        ));
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
    let key = derive_key(owner.as_str(), &salt);
    let cipher = Aes256Gcm::new(&key.into());

    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| CipherError::Decryption)?;

    String::from_utf8(plaintext).map_err(|_| CipherError::Decryption)
}

/// Self-check that a stored credential still decrypts to the expected
/// secret. Diagnostics only; never called on the serving path.
pub fn verify_round_trip(secret: &str, credential: &ProtectedCredential) -> bool {
    decrypt(&credential.ciphertext, &credential.salt, &credential.owner)
        .map(|plaintext| plaintext == secret)
        .unwrap_or(false)
}
