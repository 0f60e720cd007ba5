// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Ledger Transaction Orchestration
//!
//! Submits mutating operations (vault creation, top-up, credential storage)
//! to the external ledger and tracks their asynchronous status through a
//! fixed state machine:
//!
//! ```text
//! Submitted ──▶ Included ──▶ Finalized
//!     │
//!     └────────────────────▶ Failed
//! ```
//!
//! `Included` is informational; callers act only on `Finalized`/`Failed`.
//!
//! The ledger's only channel for returning a newly minted vault id is
//! free-text log output, so identifier extraction is isolated in
//! [`log_scan`] behind an explicit, ordered pattern list with a hard
//! failure when nothing matches.

pub mod client;
pub mod log_scan;
pub mod orchestrator;
pub mod types;

pub use client::{HttpLedgerClient, LedgerClient, LedgerError};
pub use log_scan::{extract_identifier, IdentifierExtractionFailed};
pub use orchestrator::{
    CreateAndProtectOutcome, CreateVaultParams, OrchestratorError, TxOrchestrator,
};
pub use types::{
    LedgerArg, LedgerStatus, TransactionHandle, TransactionRecord, TxState,
    CREATE_VAULT_SCRIPT, FUND_VAULT_SCRIPT, STORE_CREDENTIAL_SCRIPT,
};
