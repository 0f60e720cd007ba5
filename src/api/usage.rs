// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Usage view, attestation ingest, and pricing endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::warn;

use crate::{
    error::ApiError,
    models::{AttestationEvent, AttestationResponse, PriceQuoteQuery, PriceQuoteResponse},
    pricing::PricingTable,
    state::AppState,
    storage::{AuditEvent, AuditEventType, AuditRepository, StorageError, VaultRepository},
    usage::{
        AttestationOutcome, HybridUsage, ReconcileError, UsageConfirmedSnapshot, UsageTotals,
        UsageWindow,
    },
};

fn log_audit(state: &AppState, event: AuditEvent) {
    if let Err(e) = AuditRepository::new(&state.storage).log(&event) {
        warn!(error = %e, "Failed to write audit event");
    }
}

/// The merged pending/confirmed billing view for a vault.
///
/// Always renders: gateway trouble degrades the pending side (stale cache
/// or zeroes plus flags) instead of failing the request.
#[utoipa::path(
    get,
    path = "/v1/vaults/{vault_id}/usage",
    tag = "Usage",
    params(("vault_id" = u64, Path, description = "Vault ID")),
    responses(
        (status = 200, description = "Hybrid usage view", body = HybridUsage),
        (status = 404, description = "Vault not found")
    )
)]
pub async fn hybrid_usage(
    State(state): State<AppState>,
    Path(vault_id): Path<u64>,
) -> Result<Json<HybridUsage>, ApiError> {
    let repo = VaultRepository::new(&state.storage);
    let record = repo.get(vault_id).map_err(|e| match e {
        StorageError::NotFound(_) => ApiError::not_found(format!("vault {vault_id} not found")),
        other => ApiError::internal(format!("failed to read vault record: {other}")),
    })?;

    match record.gateway_credential_id {
        Some(credential_id) => Ok(Json(state.engine.hybrid_view(vault_id, &credential_id).await)),
        // No credential yet: there is no pending feed to consult. Render
        // the confirmed side alone, flagged as degraded.
        None => {
            let confirmed = state.engine.confirmed_snapshot(vault_id);
            Ok(Json(HybridUsage {
                pending: UsageWindow {
                    tokens: 0,
                    requests: 0,
                    cost: Decimal::ZERO,
                },
                total: UsageTotals {
                    tokens: confirmed.tokens,
                    requests: confirmed.requests,
                    estimated_cost: confirmed.cost,
                    billable_cost: confirmed.cost,
                    pending_bill: Decimal::ZERO,
                },
                confirmed,
                stale: false,
                data_unavailable: true,
            }))
        }
    }
}

/// Ingest one attestation event from the oracle feed.
///
/// An out-of-order snapshot is dropped with a warning and reported as such
/// — the feed treats it as delivered. Only a persistence failure errors,
/// so the feed retries instead of losing settled usage.
#[utoipa::path(
    post,
    path = "/v1/attestations",
    tag = "Usage",
    request_body = AttestationEvent,
    responses(
        (status = 200, description = "Attestation processed", body = AttestationResponse),
        (status = 503, description = "Snapshot could not be persisted; retry")
    )
)]
pub async fn ingest_attestation(
    State(state): State<AppState>,
    Json(event): Json<AttestationEvent>,
) -> Result<Json<AttestationResponse>, ApiError> {
    let vault_id = event.vault_id;
    let snapshot = UsageConfirmedSnapshot {
        tokens: event.tokens,
        requests: event.requests,
        cost: event.cost,
        attested_at: Utc::now(),
        attestation_round: event.attestation_round,
    };

    match state.engine.record_attestation(vault_id, snapshot) {
        Ok(AttestationOutcome::Recorded) => {
            log_audit(
                &state,
                AuditEvent::new(AuditEventType::AttestationRecorded)
                    .with_vault(vault_id)
                    .with_details(serde_json::json!({
                        "tokens": event.tokens,
                        "round": event.attestation_round,
                    })),
            );
            Ok(Json(AttestationResponse {
                outcome: "recorded".to_string(),
            }))
        }
        Ok(AttestationOutcome::OutOfOrder) => {
            log_audit(
                &state,
                AuditEvent::new(AuditEventType::AttestationRejected)
                    .with_vault(vault_id)
                    .failed("snapshot would move confirmed usage backwards"),
            );
            Ok(Json(AttestationResponse {
                outcome: "out_of_order".to_string(),
            }))
        }
        Err(ReconcileError::Persist(e)) => Err(ApiError::service_unavailable(format!(
            "attestation accepted but could not be persisted, retry required: {e}"
        ))),
    }
}

/// Resolve a price quote for a volume/model/markup combination.
#[utoipa::path(
    get,
    path = "/v1/pricing/quote",
    tag = "Pricing",
    params(PriceQuoteQuery),
    responses(
        (status = 200, description = "Resolved quote", body = PriceQuoteResponse)
    )
)]
pub async fn price_quote(
    State(state): State<AppState>,
    Query(query): Query<PriceQuoteQuery>,
) -> Result<Json<PriceQuoteResponse>, ApiError> {
    let markup = query.markup_pct.unwrap_or(state.markup_pct);

    Ok(Json(PriceQuoteResponse {
        tier: state.pricing.tier_for(query.tokens).name.clone(),
        unit_price_per_1k: state.pricing.unit_price(query.tokens, &query.model, markup),
        markup_pct: PricingTable::clamp_markup(markup),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{create_test_vault, test_state, TestState};
    use std::str::FromStr;

    fn attestation(vault_id: u64, tokens: u64, cost: &str) -> AttestationEvent {
        AttestationEvent {
            vault_id,
            tokens,
            requests: tokens / 100,
            cost: Decimal::from_str(cost).unwrap(),
            attestation_round: None,
        }
    }

    #[tokio::test]
    async fn hybrid_view_reconciles_both_feeds() {
        let TestState { state, gateway, _dir, .. } = test_state();
        let vault_id = create_test_vault(&state, "0xA11CE").await;

        gateway.set_usage(1500, "1.50");
        ingest_attestation(State(state.clone()), Json(attestation(vault_id, 1000, "1.00")))
            .await
            .unwrap();

        let view = hybrid_usage(State(state), Path(vault_id)).await.unwrap();
        assert_eq!(view.0.pending.tokens, 500);
        assert_eq!(view.0.confirmed.tokens, 1000);
        assert_eq!(view.0.total.tokens, 1500);
        assert_eq!(
            view.0.total.pending_bill,
            Decimal::from_str("0.50").unwrap()
        );
    }

    #[tokio::test]
    async fn out_of_order_attestation_reports_outcome() {
        let TestState { state, _dir, .. } = test_state();
        let vault_id = create_test_vault(&state, "0xA11CE").await;

        ingest_attestation(State(state.clone()), Json(attestation(vault_id, 1000, "1.00")))
            .await
            .unwrap();
        let response =
            ingest_attestation(State(state), Json(attestation(vault_id, 400, "0.40")))
                .await
                .unwrap();

        assert_eq!(response.0.outcome, "out_of_order");
    }

    #[tokio::test]
    async fn gateway_outage_degrades_the_view() {
        let TestState { state, gateway, _dir, .. } = test_state();
        let vault_id = create_test_vault(&state, "0xA11CE").await;

        gateway.set_outage();
        let view = hybrid_usage(State(state), Path(vault_id)).await.unwrap();
        assert!(view.0.data_unavailable);
        assert_eq!(view.0.pending.tokens, 0);
    }

    #[tokio::test]
    async fn unknown_vault_is_not_found() {
        let TestState { state, _dir, .. } = test_state();

        let err = hybrid_usage(State(state), Path(12345)).await.unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn quote_selects_tier_by_boundary() {
        let TestState { state, _dir, .. } = test_state();

        let starter = price_quote(
            State(state.clone()),
            Query(PriceQuoteQuery {
                tokens: 99_999,
                model: "unknown".to_string(),
                markup_pct: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(starter.0.tier, "Starter");

        let growth = price_quote(
            State(state),
            Query(PriceQuoteQuery {
                tokens: 100_000,
                model: "unknown".to_string(),
                markup_pct: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(growth.0.tier, "Growth");
    }

    #[tokio::test]
    async fn quote_clamps_markup() {
        let TestState { state, _dir, .. } = test_state();

        let quote = price_quote(
            State(state),
            Query(PriceQuoteQuery {
                tokens: 0,
                model: "unknown".to_string(),
                markup_pct: Some(Decimal::from(900)),
            }),
        )
        .await
        .unwrap();
        assert_eq!(quote.0.markup_pct, Decimal::from(500));
    }
}
