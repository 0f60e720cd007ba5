// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Vault lifecycle endpoints: create-and-protect, top-up, inspection, and
//! credential (re-)storage.

use std::time::Duration;

use axum::{
    extract::{Path, State},
    Json,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use rust_decimal::Decimal;
use tracing::warn;
use uuid::Uuid;

use crate::{
    crypto::cipher,
    error::ApiError,
    ledger::orchestrator::{CreateVaultParams, IssuedCredential},
    ledger::OrchestratorError,
    models::{
        CreateVaultRequest, CreateVaultResponse, StoreCredentialRequest, StoreCredentialResponse,
        TopUpRequest, TopUpResponse, VaultResponse,
    },
    state::AppState,
    storage::{AuditEvent, AuditEventType, AuditRepository, StorageError, VaultRecord,
        VaultRepository},
};

/// How long handlers wait for ledger finality before reporting a timeout.
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(60);

/// Issue a fresh gateway credential for a vault.
///
/// Sandbox issuance generates the key locally; production wires the
/// provider's enrolment API here.
fn issue_gateway_credential(provider: &str, vault_id: u64) -> IssuedCredential {
    let mut secret = [0u8; 32];
    OsRng.fill_bytes(&mut secret);

    IssuedCredential {
        credential_id: format!("{provider}-{vault_id}-{}", Uuid::new_v4()),
        secret: format!("sk-{}", URL_SAFE_NO_PAD.encode(secret)),
    }
}

/// Map orchestration failures onto distinguishable API errors. The user
/// must be able to tell whether funds moved and whether a retry is safe.
fn map_orchestrator_error(e: OrchestratorError) -> ApiError {
    match e {
        OrchestratorError::DuplicateIntent(token) => {
            ApiError::conflict(format!("an operation for intent {token} is already in flight"))
        }
        OrchestratorError::Timeout { tx_id, .. } => ApiError::timeout(format!(
            "transaction {tx_id} was not finalized in time; it may still complete — re-check the vault before retrying"
        )),
        OrchestratorError::TransactionFailed { tx_id, message } => {
            ApiError::unprocessable(format!("ledger rejected transaction {tx_id}: {message}"))
        }
        OrchestratorError::IdentifierExtraction(e) => ApiError::internal(format!(
            "vault transaction finalized but its id could not be read from the ledger log: {e}"
        )),
        OrchestratorError::Ledger(e) => {
            ApiError::service_unavailable(format!("ledger unreachable: {e}"))
        }
        OrchestratorError::CredentialIssuance(message) => {
            ApiError::service_unavailable(format!("gateway credential issuance failed: {message}"))
        }
        OrchestratorError::Cipher(e) => {
            ApiError::internal(format!("credential protection failed: {e}"))
        }
    }
}

fn log_audit(state: &AppState, event: AuditEvent) {
    if let Err(e) = AuditRepository::new(&state.storage).log(&event) {
        warn!(error = %e, "Failed to write audit event");
    }
}

/// Create a vault on the ledger and protect a freshly issued credential.
///
/// Partial success (vault created, credential not stored) returns 200 with
/// `credential_stored: false` and guidance, never an opaque error: funds
/// have already moved.
#[utoipa::path(
    post,
    path = "/v1/vaults",
    tag = "Vaults",
    request_body = CreateVaultRequest,
    responses(
        (status = 200, description = "Vault created (possibly with credential storage pending)", body = CreateVaultResponse),
        (status = 400, description = "Invalid request"),
        (status = 409, description = "Duplicate in-flight intent"),
        (status = 422, description = "Ledger rejected the transaction"),
        (status = 503, description = "Ledger unreachable"),
        (status = 504, description = "Finality not observed in time")
    )
)]
pub async fn create_vault(
    State(state): State<AppState>,
    Json(request): Json<CreateVaultRequest>,
) -> Result<Json<CreateVaultResponse>, ApiError> {
    if request.deposit <= Decimal::ZERO {
        return Err(ApiError::bad_request("deposit must be positive"));
    }
    if request.valid_until <= Utc::now() {
        return Err(ApiError::bad_request("valid_until must be in the future"));
    }

    let intent_token = request
        .intent_token
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let provider = request.provider.clone();
    let params = CreateVaultParams {
        owner: request.owner.clone(),
        provider: request.provider.clone(),
        deposit: request.deposit,
        entitlement: request.entitlement,
        withdraw_limit: request.withdraw_limit,
        valid_until: request.valid_until,
        intent_token,
        finalize_timeout: FINALIZE_TIMEOUT,
    };

    let outcome = state
        .orchestrator
        .create_and_protect(params, |vault_id| {
            let provider = provider.clone();
            async move { Ok(issue_gateway_credential(&provider, vault_id)) }
        })
        .await
        .map_err(map_orchestrator_error)?;

    // Local bookkeeping mirror; the ledger already holds the truth.
    let record = VaultRecord {
        vault_id: outcome.vault_id,
        owner: request.owner.clone(),
        provider: request.provider,
        balance: request.deposit,
        entitlement: request.entitlement,
        withdraw_limit: request.withdraw_limit,
        valid_until: request.valid_until,
        selected_models: request.selected_models,
        gateway_credential_id: None,
        created_at: Utc::now(),
    };

    let repo = VaultRepository::new(&state.storage);
    match repo.create(&record) {
        Ok(()) | Err(StorageError::AlreadyExists(_)) => {}
        Err(e) => {
            return Err(ApiError::internal(format!(
                "vault {} exists on the ledger but the local record could not be written: {e}",
                outcome.vault_id
            )))
        }
    }

    log_audit(
        &state,
        AuditEvent::new(AuditEventType::VaultCreated)
            .with_owner(request.owner.as_str())
            .with_vault(outcome.vault_id)
            .with_details(serde_json::json!({ "deposit": record.balance.to_string() })),
    );

    if outcome.credential_stored {
        repo.set_credential(
            outcome.vault_id,
            &outcome.gateway_credential_id,
            &outcome.credential,
        )
        .map_err(|e| {
            ApiError::internal(format!(
                "credential stored on the ledger but the local record could not be written: {e}"
            ))
        })?;

        log_audit(
            &state,
            AuditEvent::new(AuditEventType::CredentialStored)
                .with_owner(request.owner.as_str())
                .with_vault(outcome.vault_id),
        );
    } else {
        log_audit(
            &state,
            AuditEvent::new(AuditEventType::CredentialStored)
                .with_owner(request.owner.as_str())
                .with_vault(outcome.vault_id)
                .failed(outcome.store_error.clone().unwrap_or_default()),
        );
    }

    let guidance = (!outcome.credential_stored).then(|| {
        "Vault created and funded. Credential storage failed — store your key from the vault page to finish setup.".to_string()
    });

    Ok(Json(CreateVaultResponse {
        vault_id: outcome.vault_id,
        create_tx_id: outcome.create_tx_id,
        credential_stored: outcome.credential_stored,
        store_error: outcome.store_error,
        gateway_credential_id: outcome.gateway_credential_id,
        guidance,
    }))
}

/// Get a vault's local record.
#[utoipa::path(
    get,
    path = "/v1/vaults/{vault_id}",
    tag = "Vaults",
    params(("vault_id" = u64, Path, description = "Vault ID")),
    responses(
        (status = 200, description = "Vault found", body = VaultResponse),
        (status = 404, description = "Vault not found")
    )
)]
pub async fn get_vault(
    State(state): State<AppState>,
    Path(vault_id): Path<u64>,
) -> Result<Json<VaultResponse>, ApiError> {
    let repo = VaultRepository::new(&state.storage);
    let record = repo.get(vault_id).map_err(|e| match e {
        StorageError::NotFound(_) => ApiError::not_found(format!("vault {vault_id} not found")),
        other => ApiError::internal(format!("failed to read vault record: {other}")),
    })?;
    let credential_present = repo
        .get_credential(vault_id)
        .map_err(|e| ApiError::internal(format!("failed to read credential record: {e}")))?
        .is_some();

    Ok(Json(VaultResponse::from_record(record, credential_present)))
}

/// Top up a vault's balance.
#[utoipa::path(
    post,
    path = "/v1/vaults/{vault_id}/topup",
    tag = "Vaults",
    params(("vault_id" = u64, Path, description = "Vault ID")),
    request_body = TopUpRequest,
    responses(
        (status = 200, description = "Top-up finalized", body = TopUpResponse),
        (status = 400, description = "Invalid amount"),
        (status = 404, description = "Vault not found"),
        (status = 409, description = "Duplicate in-flight intent"),
        (status = 504, description = "Finality not observed in time")
    )
)]
pub async fn topup_vault(
    State(state): State<AppState>,
    Path(vault_id): Path<u64>,
    Json(request): Json<TopUpRequest>,
) -> Result<Json<TopUpResponse>, ApiError> {
    if request.amount <= Decimal::ZERO {
        return Err(ApiError::bad_request("amount must be positive"));
    }

    let repo = VaultRepository::new(&state.storage);
    if !repo.exists(vault_id) {
        return Err(ApiError::not_found(format!("vault {vault_id} not found")));
    }

    let intent_token = request
        .intent_token
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let tx = state
        .orchestrator
        .fund_vault(vault_id, request.amount, &intent_token, FINALIZE_TIMEOUT)
        .await
        .map_err(map_orchestrator_error)?;

    let record = repo
        .record_deposit(vault_id, request.amount)
        .map_err(|e| {
            ApiError::internal(format!(
                "deposit finalized on the ledger but the local balance could not be updated: {e}"
            ))
        })?;

    log_audit(
        &state,
        AuditEvent::new(AuditEventType::VaultFunded)
            .with_owner(record.owner.as_str())
            .with_vault(vault_id)
            .with_details(serde_json::json!({ "amount": request.amount.to_string() })),
    );

    Ok(Json(TopUpResponse {
        tx_id: tx.id,
        balance: record.balance,
    }))
}

/// Re-issue and store a credential for an existing vault.
///
/// Recovery path after a partial Create-and-Protect, and the rotation
/// path. A new credential replaces the old protected record; it never
/// mutates one in place.
#[utoipa::path(
    post,
    path = "/v1/vaults/{vault_id}/credential",
    tag = "Vaults",
    params(("vault_id" = u64, Path, description = "Vault ID")),
    request_body = StoreCredentialRequest,
    responses(
        (status = 200, description = "Credential stored", body = StoreCredentialResponse),
        (status = 404, description = "Vault not found"),
        (status = 409, description = "Duplicate in-flight intent"),
        (status = 504, description = "Finality not observed in time")
    )
)]
pub async fn store_credential(
    State(state): State<AppState>,
    Path(vault_id): Path<u64>,
    Json(request): Json<StoreCredentialRequest>,
) -> Result<Json<StoreCredentialResponse>, ApiError> {
    let repo = VaultRepository::new(&state.storage);
    let record = repo.get(vault_id).map_err(|e| match e {
        StorageError::NotFound(_) => ApiError::not_found(format!("vault {vault_id} not found")),
        other => ApiError::internal(format!("failed to read vault record: {other}")),
    })?;

    let issued = issue_gateway_credential(&record.provider, vault_id);
    let protected = cipher::encrypt(&issued.secret, &record.owner)
        .map_err(|e| ApiError::internal(format!("credential protection failed: {e}")))?;

    let intent_token = request
        .intent_token
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    state
        .orchestrator
        .store_credential(vault_id, &protected, &intent_token, FINALIZE_TIMEOUT)
        .await
        .map_err(map_orchestrator_error)?;

    repo.set_credential(vault_id, &issued.credential_id, &protected)
        .map_err(|e| {
            ApiError::internal(format!(
                "credential stored on the ledger but the local record could not be written: {e}"
            ))
        })?;

    log_audit(
        &state,
        AuditEvent::new(AuditEventType::CredentialStored)
            .with_owner(record.owner.as_str())
            .with_vault(vault_id),
    );

    Ok(Json(StoreCredentialResponse {
        vault_id,
        gateway_credential_id: issued.credential_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{test_state, TestState};
    use crate::models::OwnerAddress;
    use std::collections::BTreeSet;

    fn create_request(owner: &str) -> CreateVaultRequest {
        CreateVaultRequest {
            owner: OwnerAddress::from(owner),
            provider: "openrouter".to_string(),
            deposit: Decimal::from(100),
            entitlement: crate::storage::EntitlementKind::Dynamic,
            withdraw_limit: Decimal::from(10),
            valid_until: Utc::now() + chrono::Duration::days(30),
            selected_models: BTreeSet::new(),
            intent_token: None,
        }
    }

    #[tokio::test]
    async fn create_then_get_vault() {
        let TestState { state, _dir, .. } = test_state();

        let response = create_vault(State(state.clone()), Json(create_request("0xA11CE")))
            .await
            .unwrap();
        assert!(response.0.credential_stored);
        assert!(response.0.guidance.is_none());
        let vault_id = response.0.vault_id;

        let vault = get_vault(State(state), Path(vault_id)).await.unwrap();
        assert_eq!(vault.0.owner, OwnerAddress::from("0xA11CE"));
        assert!(vault.0.credential_present);
        assert_eq!(vault.0.balance, Decimal::from(100));
        assert!(vault.0.gateway_credential_id.is_some());
    }

    #[tokio::test]
    async fn create_rejects_non_positive_deposit() {
        let TestState { state, _dir, .. } = test_state();

        let mut request = create_request("0xA11CE");
        request.deposit = Decimal::ZERO;

        let err = create_vault(State(state), Json(request)).await.unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn partial_success_reports_guidance() {
        let TestState { state, ledger, _dir, .. } = test_state();
        ledger.fail_store_credential();

        let response = create_vault(State(state.clone()), Json(create_request("0xA11CE")))
            .await
            .unwrap();

        assert!(!response.0.credential_stored);
        assert!(response.0.store_error.is_some());
        assert!(response.0.guidance.is_some());

        // The vault record exists, with no credential on file.
        let vault = get_vault(State(state), Path(response.0.vault_id))
            .await
            .unwrap();
        assert!(!vault.0.credential_present);
    }

    #[tokio::test]
    async fn store_credential_recovers_partial_creation() {
        let TestState { state, ledger, _dir, .. } = test_state();
        ledger.fail_store_credential();

        let created = create_vault(State(state.clone()), Json(create_request("0xA11CE")))
            .await
            .unwrap();
        assert!(!created.0.credential_stored);

        ledger.heal();
        let stored = store_credential(
            State(state.clone()),
            Path(created.0.vault_id),
            Json(StoreCredentialRequest { intent_token: None }),
        )
        .await
        .unwrap();
        assert_eq!(stored.0.vault_id, created.0.vault_id);

        let vault = get_vault(State(state), Path(created.0.vault_id))
            .await
            .unwrap();
        assert!(vault.0.credential_present);
    }

    #[tokio::test]
    async fn topup_updates_balance_mirror() {
        let TestState { state, _dir, .. } = test_state();

        let created = create_vault(State(state.clone()), Json(create_request("0xA11CE")))
            .await
            .unwrap();

        let response = topup_vault(
            State(state),
            Path(created.0.vault_id),
            Json(TopUpRequest {
                amount: Decimal::from(50),
                intent_token: None,
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.0.balance, Decimal::from(150));
    }

    #[tokio::test]
    async fn topup_unknown_vault_is_not_found() {
        let TestState { state, _dir, .. } = test_state();

        let err = topup_vault(
            State(state),
            Path(999),
            Json(TopUpRequest {
                amount: Decimal::from(50),
                intent_token: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::NOT_FOUND);
    }
}
