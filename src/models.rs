// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Request and response data structures for the REST API. All types derive
//! `Serialize`, `Deserialize`, and `ToSchema` for automatic JSON handling
//! and OpenAPI documentation.
//!
//! ## Owner Address Type
//!
//! The [`OwnerAddress`] newtype wraps the wallet address that names a vault
//! owner. The address is an opaque, stable identity string: it is the key
//! derivation input for credential protection and the access-control check
//! everywhere else. It is never stored encrypted itself.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::storage::{EntitlementKind, VaultRecord};

// =============================================================================
// Owner Address Type
// =============================================================================

/// Wallet address of a vault owner.
///
/// Opaque and stable; the service never parses or checksums it, only
/// compares it and feeds it to key derivation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OwnerAddress(pub String);

impl OwnerAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OwnerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OwnerAddress {
    fn from(value: String) -> Self {
        OwnerAddress(value)
    }
}

impl From<&str> for OwnerAddress {
    fn from(value: &str) -> Self {
        OwnerAddress(value.to_string())
    }
}

impl From<OwnerAddress> for String {
    fn from(value: OwnerAddress) -> Self {
        value.0
    }
}

// =============================================================================
// Vault Models
// =============================================================================

/// Request to create a vault and protect a freshly issued credential.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateVaultRequest {
    /// Wallet address of the vault owner.
    pub owner: OwnerAddress,
    /// Downstream gateway provider for this subscription.
    pub provider: String,
    /// Initial deposit moved into the vault.
    pub deposit: Decimal,
    pub entitlement: EntitlementKind,
    pub withdraw_limit: Decimal,
    pub valid_until: DateTime<Utc>,
    /// Models this subscription is entitled to call.
    #[serde(default)]
    pub selected_models: BTreeSet<String>,
    /// Client-generated idempotency token; one is generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_token: Option<String>,
}

/// Result of vault creation.
///
/// `credential_stored == false` is the partial-success case: the vault
/// exists and funds moved, but the credential must be stored in a separate
/// retry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateVaultResponse {
    pub vault_id: u64,
    pub create_tx_id: String,
    pub credential_stored: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_error: Option<String>,
    pub gateway_credential_id: String,
    /// Next-step hint for the dashboard when storage failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
}

/// Request to top up a vault's balance.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TopUpRequest {
    pub amount: Decimal,
    /// Client-generated idempotency token; one is generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_token: Option<String>,
}

/// Result of a finalized top-up.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TopUpResponse {
    pub tx_id: String,
    /// Local balance mirror after the deposit.
    pub balance: Decimal,
}

/// Vault view returned to API clients. Never includes ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VaultResponse {
    pub vault_id: u64,
    pub owner: OwnerAddress,
    pub provider: String,
    pub balance: Decimal,
    pub entitlement: EntitlementKind,
    pub withdraw_limit: Decimal,
    pub valid_until: DateTime<Utc>,
    pub selected_models: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_credential_id: Option<String>,
    /// Whether a protected credential is on file for this vault.
    pub credential_present: bool,
    pub created_at: DateTime<Utc>,
}

impl VaultResponse {
    pub fn from_record(record: VaultRecord, credential_present: bool) -> Self {
        Self {
            vault_id: record.vault_id,
            owner: record.owner,
            provider: record.provider,
            balance: record.balance,
            entitlement: record.entitlement,
            withdraw_limit: record.withdraw_limit,
            valid_until: record.valid_until,
            selected_models: record.selected_models,
            gateway_credential_id: record.gateway_credential_id,
            credential_present,
            created_at: record.created_at,
        }
    }
}

// =============================================================================
// Credential Access Models
// =============================================================================

/// Request to re-issue and store a credential (recovery after partial
/// creation, or rotation).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoreCredentialRequest {
    /// Client-generated idempotency token; one is generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_token: Option<String>,
}

/// Result of storing a credential.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoreCredentialResponse {
    pub vault_id: u64,
    pub gateway_credential_id: String,
}

/// Challenge the wallet must sign before a credential is revealed.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChallengeResponse {
    /// Single-use identifier for the reveal call.
    pub nonce: String,
    /// The exact message to sign.
    pub message: String,
    pub expires_at: DateTime<Utc>,
}

/// Signed challenge redemption.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RevealRequest {
    pub nonce: String,
    /// Signature produced by the owner's wallet over the challenge message.
    pub signature: String,
}

/// The decrypted credential, released only through the signature gate.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RevealResponse {
    pub credential: String,
}

// =============================================================================
// Usage & Attestation Models
// =============================================================================

/// One attestation event from the oracle feed.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AttestationEvent {
    pub vault_id: u64,
    pub tokens: u64,
    pub requests: u64,
    pub cost: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation_round: Option<u64>,
}

/// Outcome of attestation ingest.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AttestationResponse {
    /// `recorded`, or `out_of_order` when the snapshot was dropped.
    pub outcome: String,
}

/// Query parameters for a price quote.
#[derive(Debug, Deserialize, IntoParams)]
pub struct PriceQuoteQuery {
    /// Cumulative token volume used for tier selection.
    pub tokens: u64,
    /// Model identifier; unknown models price at multiplier 1.0.
    pub model: String,
    /// Markup percentage override (0-500). Falls back to the configured
    /// marketplace markup.
    pub markup_pct: Option<Decimal>,
}

/// A resolved price quote.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PriceQuoteResponse {
    pub tier: String,
    pub unit_price_per_1k: Decimal,
    pub markup_pct: Decimal,
}
