// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signature-gated credential decryption.
//!
//! A stored [`ProtectedCredential`] may be fetched eagerly, but its
//! plaintext is never computed until the owner proves consent by signing a
//! fresh challenge bound to the specific vault. The wallet connector
//! authenticates the signer; this gate enforces freshness, vault binding,
//! and single use of each challenge.
//!
//! Challenge state is session-scoped and in-memory only. It is discarded on
//! process exit and is never written through the persistence layer.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use super::cipher::{self, CipherError, ProtectedCredential};
use crate::models::OwnerAddress;

/// Default lifetime of an issued challenge.
const DEFAULT_CHALLENGE_TTL: Duration = Duration::from_secs(300);

/// Errors from the signature gate.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// The signer declined or the signing capability failed. No decryption
    /// was attempted.
    #[error("signature request declined: {0}")]
    SignatureDeclined(String),

    #[error("challenge is unknown or already used")]
    UnknownChallenge,

    #[error("challenge expired")]
    ChallengeExpired,

    #[error("challenge was issued for a different vault")]
    VaultMismatch,

    #[error(transparent)]
    Cipher(#[from] CipherError),
}

/// A challenge handed to the owner's wallet for signing.
#[derive(Debug, Clone)]
pub struct Challenge {
    /// Single-use identifier for redeeming the signed challenge.
    pub nonce: String,
    /// The exact message the wallet must sign.
    pub message: String,
    /// The vault the challenge is bound to.
    pub vault_id: u64,
    /// When the challenge stops being redeemable.
    pub expires_at: DateTime<Utc>,
}

struct IssuedChallenge {
    vault_id: u64,
    owner: OwnerAddress,
    issued_at: Instant,
}

/// Issues and redeems single-use signed challenges that gate decryption.
pub struct SignatureGate {
    challenges: Mutex<HashMap<String, IssuedChallenge>>,
    ttl: Duration,
}

impl Default for SignatureGate {
    fn default() -> Self {
        Self::new(DEFAULT_CHALLENGE_TTL)
    }
}

impl SignatureGate {
    /// Create a gate with a custom challenge lifetime.
    pub fn new(ttl: Duration) -> Self {
        Self {
            challenges: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Issue a fresh challenge bound to `vault_id`.
    ///
    /// The message embeds the vault id, a timestamp, and a random nonce so
    /// a signature over it cannot be replayed against a different vault.
    pub fn issue(&self, vault_id: u64, owner: &OwnerAddress) -> Challenge {
        let nonce = Uuid::new_v4().to_string();
        let now = Utc::now();
        let message = format!(
            "MeterVault credential access\nvault: {vault_id}\nissued: {}\nnonce: {nonce}",
            now.to_rfc3339()
        );

        if let Ok(mut challenges) = self.challenges.lock() {
            // Opportunistic cleanup so abandoned challenges don't accumulate.
            challenges.retain(|_, c| c.issued_at.elapsed() < self.ttl);
            challenges.insert(
                nonce.clone(),
                IssuedChallenge {
                    vault_id,
                    owner: owner.clone(),
                    issued_at: Instant::now(),
                },
            );
        }

        debug!(vault_id, nonce = %nonce, "Issued credential access challenge");

        Challenge {
            nonce,
            message,
            vault_id,
            expires_at: now
                + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::zero()),
        }
    }

    /// Redeem a signed challenge, consuming it.
    ///
    /// Returns the owner identity recorded at issuance, which the caller
    /// uses for key re-derivation. A challenge can be redeemed exactly once;
    /// a second redemption fails with [`GateError::UnknownChallenge`].
    pub fn redeem(
        &self,
        nonce: &str,
        vault_id: u64,
        signature: &str,
    ) -> Result<OwnerAddress, GateError> {
        if signature.trim().is_empty() {
            return Err(GateError::SignatureDeclined(
                "empty signature".to_string(),
            ));
        }

        let mut challenges = self
            .challenges
            .lock()
            .map_err(|_| GateError::UnknownChallenge)?;

        let issued = challenges
            .remove(nonce)
            .ok_or(GateError::UnknownChallenge)?;

        if issued.issued_at.elapsed() >= self.ttl {
            return Err(GateError::ChallengeExpired);
        }
        if issued.vault_id != vault_id {
            return Err(GateError::VaultMismatch);
        }

        Ok(issued.owner)
    }

    /// One-shot gated decryption: issue a challenge, obtain a signature via
    /// `sign`, and only then decrypt.
    ///
    /// If `sign` fails, no decryption is attempted and
    /// [`GateError::SignatureDeclined`] is returned.
    pub fn decrypt_with_proof<S>(
        &self,
        credential: &ProtectedCredential,
        vault_id: u64,
        sign: S,
    ) -> Result<String, GateError>
    where
        S: FnOnce(&str) -> Result<String, String>,
    {
        self.decrypt_with_proof_inner(credential, vault_id, sign, cipher::decrypt)
    }

    fn decrypt_with_proof_inner<S, D>(
        &self,
        credential: &ProtectedCredential,
        vault_id: u64,
        sign: S,
        decrypt: D,
    ) -> Result<String, GateError>
    where
        S: FnOnce(&str) -> Result<String, String>,
        D: Fn(&str, &str, &OwnerAddress) -> Result<String, CipherError>,
    {
        let challenge = self.issue(vault_id, &credential.owner);

        let signature = sign(&challenge.message).map_err(GateError::SignatureDeclined)?;
        let owner = self.redeem(&challenge.nonce, vault_id, &signature)?;

        Ok(decrypt(&credential.ciphertext, &credential.salt, &owner)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn protected(owner: &str, secret: &str) -> ProtectedCredential {
        cipher::encrypt(secret, &OwnerAddress::from(owner)).unwrap()
    }

    #[test]
    fn gated_decryption_roundtrips() {
        let gate = SignatureGate::default();
        let credential = protected("0xA11CE", "sk-secret");

        let plaintext = gate
            .decrypt_with_proof(&credential, 42, |message| {
                assert!(message.contains("vault: 42"));
                Ok("0xsigned".to_string())
            })
            .unwrap();

        assert_eq!(plaintext, "sk-secret");
    }

    #[test]
    fn declined_signature_never_reaches_cipher() {
        let gate = SignatureGate::default();
        let credential = protected("0xA11CE", "sk-secret");
        let decrypt_calls = AtomicUsize::new(0);

        let result = gate.decrypt_with_proof_inner(
            &credential,
            42,
            |_message| Err("user rejected in wallet".to_string()),
            |_, _, _| {
                decrypt_calls.fetch_add(1, Ordering::SeqCst);
                Ok("never".to_string())
            },
        );

        assert!(matches!(result, Err(GateError::SignatureDeclined(_))));
        assert_eq!(decrypt_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn challenge_is_single_use() {
        let gate = SignatureGate::default();
        let owner = OwnerAddress::from("0xA11CE");

        let challenge = gate.issue(7, &owner);
        gate.redeem(&challenge.nonce, 7, "0xsig").unwrap();

        let err = gate.redeem(&challenge.nonce, 7, "0xsig").unwrap_err();
        assert!(matches!(err, GateError::UnknownChallenge));
    }

    #[test]
    fn challenge_bound_to_vault() {
        let gate = SignatureGate::default();
        let owner = OwnerAddress::from("0xA11CE");

        let challenge = gate.issue(7, &owner);
        let err = gate.redeem(&challenge.nonce, 8, "0xsig").unwrap_err();
        assert!(matches!(err, GateError::VaultMismatch));
    }

    #[test]
    fn expired_challenge_rejected() {
        let gate = SignatureGate::new(Duration::from_millis(1));
        let owner = OwnerAddress::from("0xA11CE");

        let challenge = gate.issue(7, &owner);
        std::thread::sleep(Duration::from_millis(5));

        let err = gate.redeem(&challenge.nonce, 7, "0xsig").unwrap_err();
        assert!(matches!(err, GateError::ChallengeExpired));
    }

    #[test]
    fn empty_signature_is_declined() {
        let gate = SignatureGate::default();
        let owner = OwnerAddress::from("0xA11CE");

        let challenge = gate.issue(7, &owner);
        let err = gate.redeem(&challenge.nonce, 7, "   ").unwrap_err();
        assert!(matches!(err, GateError::SignatureDeclined(_)));
    }

    #[test]
    fn unknown_nonce_rejected() {
        let gate = SignatureGate::default();
        let err = gate.redeem("not-a-nonce", 7, "0xsig").unwrap_err();
        assert!(matches!(err, GateError::UnknownChallenge));
    }
}
