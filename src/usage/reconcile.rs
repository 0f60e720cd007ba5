// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Usage Reconciliation Engine
//!
//! Merges two independently arriving usage signals into one billing view
//! that never counts the same unit of usage twice:
//!
//! - **Pending**: the gateway's immediate, unattested cumulative counters.
//!   Refreshed frequently; each sample supersedes the previous one and
//!   samples are never summed across polls.
//! - **Confirmed**: the cumulative usage the ledger has already priced and
//!   settled, delivered by the attestation oracle on its own cadence.
//!   Monotonically non-decreasing.
//!
//! Both counters are cumulative-from-inception over the same credential,
//! so the not-yet-billed portion is exactly their non-negative difference.
//! The clamp at zero absorbs races where a freshly attested snapshot
//! briefly overtakes a stale pending sample. The two cadences may disagree
//! arbitrarily; nothing here assumes lock-step delivery.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use lru::LruCache;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use super::gateway::{GatewayUsageRecord, UsageSource};
use crate::pricing::PricingTable;
use crate::storage::{AttestationRepository, FileStore, StorageError};

/// Max credentials with a cached pending sample.
const PENDING_CACHE_CAPACITY: usize = 1024;

/// Default freshness window for a cached pending sample.
const DEFAULT_SAMPLE_TTL: Duration = Duration::from_secs(30);

/// Unattested usage visible at the gateway, as of `observed_at`.
///
/// Counters are cumulative from credential inception.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UsagePendingSample {
    pub tokens: u64,
    pub requests: u64,
    pub cost: Decimal,
    pub observed_at: DateTime<Utc>,
}

impl UsagePendingSample {
    /// A zeroed sample, used when no data is available.
    pub fn zero(observed_at: DateTime<Utc>) -> Self {
        Self {
            tokens: 0,
            requests: 0,
            cost: Decimal::ZERO,
            observed_at,
        }
    }
}

/// Cumulative usage the ledger has already priced and settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UsageConfirmedSnapshot {
    pub tokens: u64,
    pub requests: u64,
    pub cost: Decimal,
    pub attested_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation_round: Option<u64>,
}

impl UsageConfirmedSnapshot {
    /// The snapshot of a vault that has never been attested.
    pub fn zero() -> Self {
        Self {
            tokens: 0,
            requests: 0,
            cost: Decimal::ZERO,
            attested_at: DateTime::UNIX_EPOCH,
            attestation_round: None,
        }
    }
}

/// The not-yet-billed slice of usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UsageWindow {
    pub tokens: u64,
    pub requests: u64,
    pub cost: Decimal,
}

/// Totals over both signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UsageTotals {
    pub tokens: u64,
    pub requests: u64,
    /// Cost of everything the gateway has seen (pending estimate).
    pub estimated_cost: Decimal,
    /// Cost the ledger has already settled.
    pub billable_cost: Decimal,
    /// Estimated cost of the not-yet-billed slice.
    pub pending_bill: Decimal,
}

/// The merged billing view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HybridUsage {
    pub pending: UsageWindow,
    pub confirmed: UsageConfirmedSnapshot,
    pub total: UsageTotals,
    /// The pending side came from a cache after a failed refresh.
    pub stale: bool,
    /// No pending data exists at all; pending renders as zero.
    pub data_unavailable: bool,
}

/// A pending sample plus its degradation flags.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSampleView {
    pub sample: UsagePendingSample,
    pub stale: bool,
    pub data_unavailable: bool,
}

/// Result of feeding one attestation into the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestationOutcome {
    Recorded,
    /// The snapshot would move confirmed usage backwards; it was dropped
    /// and the stored snapshot left unchanged.
    OutOfOrder,
}

/// Errors from the reconciliation engine.
///
/// Only the authoritative (confirmed) path can fail hard: a snapshot that
/// cannot be persisted must be surfaced so the feed retries, never
/// silently dropped.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("failed to persist attestation snapshot: {0}")]
    Persist(#[from] StorageError),
}

struct CachedSample {
    sample: UsagePendingSample,
    inserted_at: Instant,
}

/// Reconciles pending and confirmed usage per vault/credential.
pub struct ReconciliationEngine {
    source: Arc<dyn UsageSource>,
    pricing: PricingTable,
    markup_pct: Decimal,
    confirmed: Mutex<HashMap<u64, UsageConfirmedSnapshot>>,
    pending: Mutex<LruCache<String, CachedSample>>,
    sample_ttl: Duration,
    store: Option<Arc<FileStore>>,
}

impl ReconciliationEngine {
    pub fn new(source: Arc<dyn UsageSource>, pricing: PricingTable, markup_pct: Decimal) -> Self {
        Self {
            source,
            pricing,
            markup_pct,
            confirmed: Mutex::new(HashMap::new()),
            pending: Mutex::new(LruCache::new(
                NonZeroUsize::new(PENDING_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            )),
            sample_ttl: DEFAULT_SAMPLE_TTL,
            store: None,
        }
    }

    /// Persist accepted attestations through the given store.
    pub fn with_store(mut self, store: Arc<FileStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the pending-sample freshness window.
    pub fn with_sample_ttl(mut self, ttl: Duration) -> Self {
        self.sample_ttl = ttl;
        self
    }

    /// Rebuild the in-memory confirmed state from persisted snapshots.
    /// Called once on startup.
    pub fn load_persisted(&self) -> Result<usize, ReconcileError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let snapshots = AttestationRepository::new(store).load_all()?;
        let count = snapshots.len();

        let mut confirmed = lock_recovering(&self.confirmed);
        for (vault_id, snapshot) in snapshots {
            confirmed.insert(vault_id, snapshot);
        }
        if count > 0 {
            info!(count, "Restored confirmed usage snapshots");
        }
        Ok(count)
    }

    /// Feed one attested snapshot into the engine.
    ///
    /// The monotonicity check and the write happen under one lock, so two
    /// racing attestations for the same vault cannot interleave between
    /// check and insert. A snapshot that moves any counter backwards is
    /// dropped with a warning — out-of-order or duplicate oracle delivery
    /// must never rewind confirmed usage.
    pub fn record_attestation(
        &self,
        vault_id: u64,
        snapshot: UsageConfirmedSnapshot,
    ) -> Result<AttestationOutcome, ReconcileError> {
        let mut confirmed = lock_recovering(&self.confirmed);

        if let Some(existing) = confirmed.get(&vault_id) {
            if snapshot.tokens < existing.tokens
                || snapshot.requests < existing.requests
                || snapshot.cost < existing.cost
            {
                warn!(
                    vault_id,
                    stored_tokens = existing.tokens,
                    offered_tokens = snapshot.tokens,
                    "Attestation out of order; keeping stored snapshot"
                );
                return Ok(AttestationOutcome::OutOfOrder);
            }
        }

        if let Some(store) = &self.store {
            AttestationRepository::new(store).put(vault_id, &snapshot)?;
        }

        debug!(
            vault_id,
            tokens = snapshot.tokens,
            round = ?snapshot.attestation_round,
            "Recorded attestation"
        );
        confirmed.insert(vault_id, snapshot);
        Ok(AttestationOutcome::Recorded)
    }

    /// The confirmed snapshot for a vault, zeroed if never attested.
    pub fn confirmed_snapshot(&self, vault_id: u64) -> UsageConfirmedSnapshot {
        lock_recovering(&self.confirmed)
            .get(&vault_id)
            .cloned()
            .unwrap_or_else(UsageConfirmedSnapshot::zero)
    }

    /// Query the gateway and replace the cached sample for `credential_id`.
    ///
    /// On gateway failure the view degrades instead of erroring: the last
    /// cached sample is returned tagged `stale`, or a zeroed sample tagged
    /// `data_unavailable` when no cache exists. The view always renders.
    pub async fn refresh_pending(&self, credential_id: &str) -> PendingSampleView {
        match self
            .source
            .usage_since(credential_id, DateTime::UNIX_EPOCH)
            .await
        {
            Ok(records) => {
                let sample = self.build_sample(&records);
                let mut pending = lock_recovering(&self.pending);
                pending.put(
                    credential_id.to_string(),
                    CachedSample {
                        sample: sample.clone(),
                        inserted_at: Instant::now(),
                    },
                );
                PendingSampleView {
                    sample,
                    stale: false,
                    data_unavailable: false,
                }
            }
            Err(e) => {
                warn!(credential_id, error = %e, "Pending usage refresh failed; degrading");
                let mut pending = lock_recovering(&self.pending);
                match pending.get(credential_id) {
                    Some(cached) => PendingSampleView {
                        sample: cached.sample.clone(),
                        stale: true,
                        data_unavailable: false,
                    },
                    None => PendingSampleView {
                        sample: UsagePendingSample::zero(Utc::now()),
                        stale: false,
                        data_unavailable: true,
                    },
                }
            }
        }
    }

    /// Push-delivery sink: accept an externally computed sample, replacing
    /// the cached one.
    pub fn ingest_sample(&self, credential_id: &str, sample: UsagePendingSample) {
        let mut pending = lock_recovering(&self.pending);
        pending.put(
            credential_id.to_string(),
            CachedSample {
                sample,
                inserted_at: Instant::now(),
            },
        );
    }

    /// A fresh-enough cached sample, if present; otherwise refresh.
    pub async fn pending_view(&self, credential_id: &str) -> PendingSampleView {
        {
            let mut pending = lock_recovering(&self.pending);
            if let Some(cached) = pending.get(credential_id) {
                if cached.inserted_at.elapsed() < self.sample_ttl {
                    return PendingSampleView {
                        sample: cached.sample.clone(),
                        stale: false,
                        data_unavailable: false,
                    };
                }
            }
        }
        self.refresh_pending(credential_id).await
    }

    /// The merged billing view for one vault/credential pair.
    ///
    /// `pending = max(0, sample - confirmed)` per counter. Subtraction, not
    /// addition, is the non-double-counting mechanism: both counters are
    /// cumulative over the same credential.
    pub async fn hybrid_view(&self, vault_id: u64, credential_id: &str) -> HybridUsage {
        let pending_view = self.pending_view(credential_id).await;
        let confirmed = self.confirmed_snapshot(vault_id);
        let sample = &pending_view.sample;

        let unbilled = UsageWindow {
            tokens: sample.tokens.saturating_sub(confirmed.tokens),
            requests: sample.requests.saturating_sub(confirmed.requests),
            cost: (sample.cost - confirmed.cost).max(Decimal::ZERO),
        };

        HybridUsage {
            total: UsageTotals {
                tokens: sample.tokens,
                requests: sample.requests,
                estimated_cost: sample.cost,
                billable_cost: confirmed.cost,
                pending_bill: unbilled.cost,
            },
            pending: unbilled,
            confirmed,
            stale: pending_view.stale,
            data_unavailable: pending_view.data_unavailable,
        }
    }

    /// Drop the cached sample for a credential that is no longer observed.
    pub fn evict(&self, credential_id: &str) {
        let mut pending = lock_recovering(&self.pending);
        pending.pop(credential_id);
    }

    /// Fold raw gateway records into one cumulative sample, pricing records
    /// the gateway didn't cost itself.
    fn build_sample(&self, records: &[GatewayUsageRecord]) -> UsagePendingSample {
        let mut tokens = 0u64;
        let mut requests = 0u64;
        let mut cost = Decimal::ZERO;

        for record in records {
            let cumulative_before = tokens;
            tokens = tokens.saturating_add(record.tokens);
            requests = requests.saturating_add(record.requests);

            cost += record.cost.unwrap_or_else(|| {
                self.pricing.cost_of(
                    record.tokens,
                    cumulative_before,
                    record.model.as_deref().unwrap_or(""),
                    self.markup_pct,
                )
            });
        }

        UsagePendingSample {
            tokens,
            requests,
            cost,
            observed_at: Utc::now(),
        }
    }
}

/// Lock a mutex, recovering the inner value if a panicking thread poisoned
/// it. Snapshot state stays usable; the write that panicked never landed.
fn lock_recovering<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::gateway::GatewayError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::str::FromStr;

    /// Scripted usage source: each call pops the next planned response;
    /// an empty plan means the gateway is down.
    struct FakeGateway {
        plan: Mutex<VecDeque<Result<Vec<GatewayUsageRecord>, GatewayError>>>,
    }

    impl FakeGateway {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                plan: Mutex::new(VecDeque::new()),
            })
        }

        fn push_records(self: &Arc<Self>, records: Vec<GatewayUsageRecord>) {
            self.plan.lock().unwrap().push_back(Ok(records));
        }

        fn push_outage(self: &Arc<Self>) {
            self.plan
                .lock()
                .unwrap()
                .push_back(Err(GatewayError::Unavailable("connection refused".into())));
        }
    }

    #[async_trait]
    impl UsageSource for FakeGateway {
        async fn usage_since(
            &self,
            _credential_id: &str,
            _since: DateTime<Utc>,
        ) -> Result<Vec<GatewayUsageRecord>, GatewayError> {
            self.plan
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(GatewayError::Unavailable("no response planned".into())))
        }
    }

    fn record(tokens: u64, cost: Option<&str>) -> GatewayUsageRecord {
        GatewayUsageRecord {
            tokens,
            requests: 1,
            cost: cost.map(|c| Decimal::from_str(c).unwrap()),
            model: None,
            timestamp: None,
        }
    }

    fn snapshot(tokens: u64, requests: u64, cost: &str) -> UsageConfirmedSnapshot {
        UsageConfirmedSnapshot {
            tokens,
            requests,
            cost: Decimal::from_str(cost).unwrap(),
            attested_at: Utc::now(),
            attestation_round: None,
        }
    }

    fn engine(gateway: Arc<FakeGateway>) -> ReconciliationEngine {
        ReconciliationEngine::new(gateway, PricingTable::default(), Decimal::ZERO)
    }

    #[tokio::test]
    async fn hybrid_view_subtracts_confirmed_from_pending() {
        let gateway = FakeGateway::new();
        gateway.push_records(vec![record(1500, Some("1.50"))]);
        let engine = engine(gateway);

        engine
            .record_attestation(1, snapshot(1000, 1, "1.00"))
            .unwrap();

        let view = engine.hybrid_view(1, "cred-1").await;
        assert_eq!(view.pending.tokens, 500);
        assert_eq!(view.confirmed.tokens, 1000);
        assert_eq!(view.total.tokens, 1500);
        assert_eq!(view.total.estimated_cost, Decimal::from_str("1.50").unwrap());
        assert_eq!(view.total.billable_cost, Decimal::from_str("1.00").unwrap());
        assert_eq!(view.total.pending_bill, Decimal::from_str("0.50").unwrap());
        assert!(!view.stale);
        assert!(!view.data_unavailable);
    }

    #[tokio::test]
    async fn stale_pending_clamps_to_zero() {
        let gateway = FakeGateway::new();
        gateway.push_records(vec![record(900, Some("0.90"))]);
        let engine = engine(gateway);

        engine
            .record_attestation(1, snapshot(1000, 5, "1.00"))
            .unwrap();

        let view = engine.hybrid_view(1, "cred-1").await;
        assert_eq!(view.pending.tokens, 0);
        assert_eq!(view.pending.requests, 0);
        assert_eq!(view.pending.cost, Decimal::ZERO);
        assert_eq!(view.total.pending_bill, Decimal::ZERO);
        // Totals still reflect what the gateway reported.
        assert_eq!(view.total.tokens, 900);
    }

    #[test]
    fn out_of_order_attestation_is_dropped() {
        let gateway = FakeGateway::new();
        let engine = engine(gateway);

        engine
            .record_attestation(1, snapshot(1000, 10, "1.00"))
            .unwrap();
        let outcome = engine
            .record_attestation(1, snapshot(500, 4, "0.50"))
            .unwrap();

        assert_eq!(outcome, AttestationOutcome::OutOfOrder);
        assert_eq!(engine.confirmed_snapshot(1).tokens, 1000);
    }

    #[test]
    fn equal_attestation_is_accepted() {
        // Duplicate delivery of the same round must not be an error.
        let gateway = FakeGateway::new();
        let engine = engine(gateway);

        engine
            .record_attestation(1, snapshot(1000, 10, "1.00"))
            .unwrap();
        let outcome = engine
            .record_attestation(1, snapshot(1000, 10, "1.00"))
            .unwrap();
        assert_eq!(outcome, AttestationOutcome::Recorded);
    }

    #[tokio::test]
    async fn samples_supersede_never_sum() {
        let gateway = FakeGateway::new();
        gateway.push_records(vec![record(100, Some("0.10"))]);
        gateway.push_records(vec![record(120, Some("0.12"))]);
        let engine = engine(gateway).with_sample_ttl(Duration::ZERO);

        let first = engine.refresh_pending("cred-1").await;
        assert_eq!(first.sample.tokens, 100);

        let second = engine.refresh_pending("cred-1").await;
        assert_eq!(second.sample.tokens, 120);
    }

    #[tokio::test]
    async fn outage_with_cache_degrades_to_stale() {
        let gateway = FakeGateway::new();
        gateway.push_records(vec![record(300, Some("0.30"))]);
        gateway.push_outage();
        let engine = engine(gateway).with_sample_ttl(Duration::ZERO);

        engine.refresh_pending("cred-1").await;
        let degraded = engine.refresh_pending("cred-1").await;

        assert!(degraded.stale);
        assert!(!degraded.data_unavailable);
        assert_eq!(degraded.sample.tokens, 300);
    }

    #[tokio::test]
    async fn outage_without_cache_renders_zeroed_view() {
        let gateway = FakeGateway::new();
        gateway.push_outage();
        let engine = engine(gateway);

        let view = engine.hybrid_view(1, "cred-never-seen").await;
        assert!(view.data_unavailable);
        assert_eq!(view.total.tokens, 0);
        assert_eq!(view.pending.tokens, 0);
    }

    #[tokio::test]
    async fn uncosted_records_are_priced_locally() {
        let gateway = FakeGateway::new();
        // 1500 tokens, no gateway cost: Starter tier at 0.02/1K.
        gateway.push_records(vec![record(1500, None)]);
        let engine = engine(gateway);

        let view = engine.refresh_pending("cred-1").await;
        assert_eq!(view.sample.cost, Decimal::from_str("0.03").unwrap());
    }

    #[tokio::test]
    async fn fresh_cache_short_circuits_the_gateway() {
        let gateway = FakeGateway::new();
        gateway.push_records(vec![record(100, Some("0.10"))]);
        // No second response planned: a second gateway hit would degrade.
        let engine = engine(gateway);

        engine.refresh_pending("cred-1").await;
        let view = engine.pending_view("cred-1").await;
        assert!(!view.stale);
        assert_eq!(view.sample.tokens, 100);
    }

    #[test]
    fn attestations_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(crate::storage::StoragePaths::new(dir.path()));
        store.initialize().unwrap();
        let store = Arc::new(store);

        let gateway = FakeGateway::new();
        let engine = ReconciliationEngine::new(
            gateway.clone(),
            PricingTable::default(),
            Decimal::ZERO,
        )
        .with_store(store.clone());

        engine
            .record_attestation(7, snapshot(5000, 50, "5.00"))
            .unwrap();

        // A fresh engine over the same store sees the snapshot.
        let rebuilt =
            ReconciliationEngine::new(gateway, PricingTable::default(), Decimal::ZERO)
                .with_store(store);
        assert_eq!(rebuilt.load_persisted().unwrap(), 1);
        assert_eq!(rebuilt.confirmed_snapshot(7).tokens, 5000);
    }

    #[tokio::test]
    async fn evicted_credential_loses_its_cache() {
        let gateway = FakeGateway::new();
        gateway.push_records(vec![record(100, Some("0.10"))]);
        gateway.push_outage();
        let engine = engine(gateway).with_sample_ttl(Duration::ZERO);

        engine.refresh_pending("cred-1").await;
        engine.evict("cred-1");

        let view = engine.refresh_pending("cred-1").await;
        assert!(view.data_unavailable);
    }
}
