// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction state machine types and ledger script templates.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Lifecycle state of a ledger transaction.
///
/// `Included` is an optional intermediate some ledgers report and some do
/// not; it never carries results. Only `Finalized` and `Failed` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TxState {
    Submitted,
    Included,
    Finalized,
    Failed,
}

impl TxState {
    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, TxState::Finalized | TxState::Failed)
    }
}

/// A typed argument filled into a ledger script template.
///
/// The service treats script templates as opaque parameterized strings; the
/// arguments are the only structured part of a submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum LedgerArg {
    UInt64(u64),
    String(String),
    /// Fixed-point amounts travel as strings to avoid precision drift.
    Amount(String),
    Bool(bool),
}

/// Status snapshot reported by the ledger for one transaction.
#[derive(Debug, Clone)]
pub struct LedgerStatus {
    pub state: TxState,
    pub block_id: Option<String>,
    pub log_lines: Vec<String>,
    pub error_message: Option<String>,
}

/// Handle returned by a submission; state starts at `Submitted`.
#[derive(Debug, Clone)]
pub struct TransactionHandle {
    pub tx_id: String,
}

/// Observed terminal (or in-flight) projection of one ledger transaction.
///
/// Transient: a view over ledger state for the caller's observation window,
/// never a source of truth and never persisted.
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub id: String,
    pub state: TxState,
    pub block_id: Option<String>,
    pub log_lines: Vec<String>,
    pub error_message: Option<String>,
}

impl TransactionRecord {
    pub(crate) fn from_status(tx_id: &str, status: LedgerStatus) -> Self {
        Self {
            id: tx_id.to_string(),
            state: status.state,
            block_id: status.block_id,
            log_lines: status.log_lines,
            error_message: status.error_message,
        }
    }
}

// =============================================================================
// Script Templates
// =============================================================================
// Opaque parameterized transaction scripts understood by the ledger. The
// service fills in typed arguments and submits; it does not interpret
// ledger semantics beyond status codes and log text.

/// Creates a subscription vault and deposits the initial balance.
pub const CREATE_VAULT_SCRIPT: &str = "\
transaction(provider: String, deposit: Amount, entitlement: String, withdrawLimit: Amount, validUntil: UInt64) {
    execute {
        SubscriptionVaults.create(provider, deposit, entitlement, withdrawLimit, validUntil)
    }
}";

/// Stores an encrypted credential against an existing vault.
pub const STORE_CREDENTIAL_SCRIPT: &str = "\
transaction(vaultId: UInt64, ciphertext: String, salt: String, intent: String) {
    execute {
        SubscriptionVaults.storeCredential(vaultId, ciphertext, salt, intent)
    }
}";

/// Tops up the balance of an existing vault.
pub const FUND_VAULT_SCRIPT: &str = "\
transaction(vaultId: UInt64, amount: Amount, intent: String) {
    execute {
        SubscriptionVaults.deposit(vaultId, amount, intent)
    }
}";
