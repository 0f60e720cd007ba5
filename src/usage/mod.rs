// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Hybrid Usage Reconciliation
//!
//! Two usage signals describe the same credential: the gateway's immediate
//! but unattested counters, and the oracle's delayed, settled attestations.
//! This module merges them into a single billing view that never bills the
//! same token twice.
//!
//! - [`gateway`] — usage-query client, tolerant of the gateway's wire
//!   shapes
//! - [`reconcile`] — the reconciliation engine and its view types
//! - [`poller`] — per-vault refresh task (pull or push delivery)

pub mod gateway;
pub mod poller;
pub mod reconcile;

pub use gateway::{GatewayError, GatewayUsageRecord, HttpGatewayClient, UsageSource};
pub use poller::{Delivery, UsageRefreshTask, UsageTaskHandle};
pub use reconcile::{
    AttestationOutcome, HybridUsage, PendingSampleView, ReconcileError, ReconciliationEngine,
    UsageConfirmedSnapshot, UsagePendingSample, UsageTotals, UsageWindow,
};
