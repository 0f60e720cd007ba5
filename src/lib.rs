// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! MeterVault - Usage-Metered API-Key Vault Service
//!
//! Backend core for the MeterVault marketplace dashboard: vault owners
//! deposit into ledger-held vaults, receive encrypted LLM-gateway
//! credentials recoverable only with their wallet, and are billed from
//! attested usage reconciled against the gateway's live counters.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `crypto` - Owner-keyed credential cipher and signature gate
//! - `ledger` - Transaction orchestration against the external ledger
//! - `pricing` - Tiered, model-weighted price resolution
//! - `usage` - Hybrid pending/confirmed usage reconciliation
//! - `storage` - File-backed persistence (vaults, attestations, audit)

pub mod api;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod models;
pub mod pricing;
pub mod state;
pub mod storage;
pub mod usage;
