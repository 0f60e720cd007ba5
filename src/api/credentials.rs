// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signature-gated credential reveal endpoints.
//!
//! The stored ciphertext is fetched eagerly, but plaintext is only computed
//! once the owner's wallet signs a fresh, vault-bound challenge. The two
//! endpoints are the interactive halves of that gate: issue a challenge,
//! then redeem it with a signature.

use axum::{
    extract::{Path, State},
    Json,
};
use tracing::warn;

use crate::{
    crypto::{cipher, CipherError, GateError},
    error::ApiError,
    models::{ChallengeResponse, RevealRequest, RevealResponse},
    state::AppState,
    storage::{AuditEvent, AuditEventType, AuditRepository, StorageError, VaultRepository},
};

fn map_gate_error(e: GateError) -> ApiError {
    match e {
        GateError::SignatureDeclined(reason) => {
            ApiError::bad_request(format!("signature declined: {reason}"))
        }
        GateError::UnknownChallenge => {
            ApiError::forbidden("challenge is unknown or already used — request a new one")
        }
        GateError::ChallengeExpired => {
            ApiError::forbidden("challenge expired — request a new one")
        }
        GateError::VaultMismatch => {
            ApiError::forbidden("challenge was issued for a different vault")
        }
        GateError::Cipher(e) => map_cipher_error(e),
    }
}

fn map_cipher_error(e: CipherError) -> ApiError {
    match e {
        // Wrong owner and corrupted data are deliberately indistinguishable.
        CipherError::Decryption => {
            ApiError::forbidden("credential could not be decrypted for this owner")
        }
        CipherError::MalformedInput(msg) => {
            ApiError::internal(format!("stored credential record is malformed: {msg}"))
        }
        CipherError::Encryption => ApiError::internal("credential protection failed"),
    }
}

fn log_audit(state: &AppState, event: AuditEvent) {
    if let Err(e) = AuditRepository::new(&state.storage).log(&event) {
        warn!(error = %e, "Failed to write audit event");
    }
}

/// Issue a fresh signing challenge for revealing a vault's credential.
#[utoipa::path(
    post,
    path = "/v1/vaults/{vault_id}/credential/challenge",
    tag = "Credentials",
    params(("vault_id" = u64, Path, description = "Vault ID")),
    responses(
        (status = 200, description = "Challenge issued", body = ChallengeResponse),
        (status = 404, description = "Vault or credential not found")
    )
)]
pub async fn issue_challenge(
    State(state): State<AppState>,
    Path(vault_id): Path<u64>,
) -> Result<Json<ChallengeResponse>, ApiError> {
    let repo = VaultRepository::new(&state.storage);
    let record = repo.get(vault_id).map_err(|e| match e {
        StorageError::NotFound(_) => ApiError::not_found(format!("vault {vault_id} not found")),
        other => ApiError::internal(format!("failed to read vault record: {other}")),
    })?;

    let has_credential = repo
        .get_credential(vault_id)
        .map_err(|e| ApiError::internal(format!("failed to read credential record: {e}")))?
        .is_some();
    if !has_credential {
        return Err(ApiError::not_found(format!(
            "vault {vault_id} has no credential on file"
        )));
    }

    let challenge = state.gate.issue(vault_id, &record.owner);

    Ok(Json(ChallengeResponse {
        nonce: challenge.nonce,
        message: challenge.message,
        expires_at: challenge.expires_at,
    }))
}

/// Redeem a signed challenge and reveal the decrypted credential.
///
/// The challenge is consumed whether or not decryption succeeds; replaying
/// a nonce always fails.
#[utoipa::path(
    post,
    path = "/v1/vaults/{vault_id}/credential/reveal",
    tag = "Credentials",
    params(("vault_id" = u64, Path, description = "Vault ID")),
    request_body = RevealRequest,
    responses(
        (status = 200, description = "Credential revealed", body = RevealResponse),
        (status = 400, description = "Signature declined"),
        (status = 403, description = "Challenge invalid, expired, or decryption refused"),
        (status = 404, description = "Vault or credential not found")
    )
)]
pub async fn reveal_credential(
    State(state): State<AppState>,
    Path(vault_id): Path<u64>,
    Json(request): Json<RevealRequest>,
) -> Result<Json<RevealResponse>, ApiError> {
    let repo = VaultRepository::new(&state.storage);
    let record = repo.get(vault_id).map_err(|e| match e {
        StorageError::NotFound(_) => ApiError::not_found(format!("vault {vault_id} not found")),
        other => ApiError::internal(format!("failed to read vault record: {other}")),
    })?;

    let owner = match state
        .gate
        .redeem(&request.nonce, vault_id, &request.signature)
    {
        Ok(owner) => owner,
        Err(e) => {
            log_audit(
                &state,
                AuditEvent::new(AuditEventType::CredentialRevealDeclined)
                    .with_owner(record.owner.as_str())
                    .with_vault(vault_id)
                    .failed(e.to_string()),
            );
            return Err(map_gate_error(e));
        }
    };

    let protected = repo
        .get_credential(vault_id)
        .map_err(|e| ApiError::internal(format!("failed to read credential record: {e}")))?
        .ok_or_else(|| {
            ApiError::not_found(format!("vault {vault_id} has no credential on file"))
        })?;

    let plaintext = cipher::decrypt(&protected.ciphertext, &protected.salt, &owner)
        .map_err(map_cipher_error)?;

    log_audit(
        &state,
        AuditEvent::new(AuditEventType::CredentialRevealed)
            .with_owner(owner.as_str())
            .with_vault(vault_id),
    );

    Ok(Json(RevealResponse {
        credential: plaintext,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{create_test_vault, test_state, TestState};

    #[tokio::test]
    async fn challenge_then_reveal_roundtrips() {
        let TestState { state, _dir, .. } = test_state();
        let vault_id = create_test_vault(&state, "0xA11CE").await;

        let challenge = issue_challenge(State(state.clone()), Path(vault_id))
            .await
            .unwrap();
        assert!(challenge.0.message.contains(&format!("vault: {vault_id}")));

        let revealed = reveal_credential(
            State(state),
            Path(vault_id),
            Json(RevealRequest {
                nonce: challenge.0.nonce,
                signature: "0xsigned-by-wallet".to_string(),
            }),
        )
        .await
        .unwrap();

        assert!(revealed.0.credential.starts_with("sk-"));
    }

    #[tokio::test]
    async fn nonce_cannot_be_replayed() {
        let TestState { state, _dir, .. } = test_state();
        let vault_id = create_test_vault(&state, "0xA11CE").await;

        let challenge = issue_challenge(State(state.clone()), Path(vault_id))
            .await
            .unwrap();

        let request = RevealRequest {
            nonce: challenge.0.nonce,
            signature: "0xsig".to_string(),
        };
        reveal_credential(State(state.clone()), Path(vault_id), Json(request.clone()))
            .await
            .unwrap();

        let err = reveal_credential(State(state), Path(vault_id), Json(request))
            .await
            .unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn empty_signature_is_rejected_before_decryption() {
        let TestState { state, _dir, .. } = test_state();
        let vault_id = create_test_vault(&state, "0xA11CE").await;

        let challenge = issue_challenge(State(state.clone()), Path(vault_id))
            .await
            .unwrap();

        let err = reveal_credential(
            State(state),
            Path(vault_id),
            Json(RevealRequest {
                nonce: challenge.0.nonce,
                signature: "  ".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn challenge_requires_a_stored_credential() {
        let TestState { state, ledger, _dir, .. } = test_state();
        ledger.fail_store_credential();
        let vault_id = create_test_vault(&state, "0xA11CE").await;

        let err = issue_challenge(State(state), Path(vault_id))
            .await
            .unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_vault_is_not_found() {
        let TestState { state, _dir, .. } = test_state();

        let err = issue_challenge(State(state), Path(404)).await.unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::NOT_FOUND);
    }
}
