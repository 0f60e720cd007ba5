// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::crypto::SignatureGate;
use crate::ledger::TxOrchestrator;
use crate::pricing::PricingTable;
use crate::storage::FileStore;
use crate::usage::ReconciliationEngine;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<FileStore>,
    pub engine: Arc<ReconciliationEngine>,
    pub orchestrator: Arc<TxOrchestrator>,
    pub gate: Arc<SignatureGate>,
    pub pricing: Arc<PricingTable>,
    /// Marketplace markup applied when quoting and pricing usage.
    pub markup_pct: Decimal,
}

impl AppState {
    pub fn new(
        storage: Arc<FileStore>,
        engine: Arc<ReconciliationEngine>,
        orchestrator: Arc<TxOrchestrator>,
        gate: Arc<SignatureGate>,
        pricing: Arc<PricingTable>,
        markup_pct: Decimal,
    ) -> Self {
        Self {
            storage,
            engine,
            orchestrator,
            gate,
            pricing,
            markup_pct,
        }
    }
}
