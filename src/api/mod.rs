// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    models::{
        AttestationEvent, AttestationResponse, ChallengeResponse, CreateVaultRequest,
        CreateVaultResponse, OwnerAddress, PriceQuoteResponse, RevealRequest, RevealResponse,
        StoreCredentialRequest, StoreCredentialResponse, TopUpRequest, TopUpResponse,
        VaultResponse,
    },
    state::AppState,
    storage::EntitlementKind,
    usage::{HybridUsage, UsageConfirmedSnapshot, UsageTotals, UsageWindow},
};

pub mod credentials;
pub mod health;
pub mod usage;
pub mod vaults;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/vaults", post(vaults::create_vault))
        .route("/vaults/{vault_id}", get(vaults::get_vault))
        .route("/vaults/{vault_id}/topup", post(vaults::topup_vault))
        .route(
            "/vaults/{vault_id}/credential",
            post(vaults::store_credential),
        )
        .route(
            "/vaults/{vault_id}/credential/challenge",
            post(credentials::issue_challenge),
        )
        .route(
            "/vaults/{vault_id}/credential/reveal",
            post(credentials::reveal_credential),
        )
        .route("/vaults/{vault_id}/usage", get(usage::hybrid_usage))
        .route("/attestations", post(usage::ingest_attestation))
        .route("/pricing/quote", get(usage::price_quote))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(state)
        .nest("/v1", v1_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        vaults::create_vault,
        vaults::get_vault,
        vaults::topup_vault,
        vaults::store_credential,
        credentials::issue_challenge,
        credentials::reveal_credential,
        usage::hybrid_usage,
        usage::ingest_attestation,
        usage::price_quote
    ),
    components(
        schemas(
            OwnerAddress,
            EntitlementKind,
            CreateVaultRequest,
            CreateVaultResponse,
            TopUpRequest,
            TopUpResponse,
            VaultResponse,
            StoreCredentialRequest,
            StoreCredentialResponse,
            ChallengeResponse,
            RevealRequest,
            RevealResponse,
            AttestationEvent,
            AttestationResponse,
            PriceQuoteResponse,
            HybridUsage,
            UsageWindow,
            UsageTotals,
            UsageConfirmedSnapshot
        )
    ),
    tags(
        (name = "Health", description = "Service health probes"),
        (name = "Vaults", description = "Vault lifecycle and funding"),
        (name = "Credentials", description = "Signature-gated credential access"),
        (name = "Usage", description = "Hybrid usage views and attestation ingest"),
        (name = "Pricing", description = "Tier and markup resolution")
    )
)]
struct ApiDoc;
