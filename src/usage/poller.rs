// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Per-Vault Usage Refresh Task
//!
//! One scheduled task per observed vault keeps its pending sample current.
//! Delivery is selectable: **pull** polls the gateway on an interval,
//! **push** consumes externally produced samples from a channel. Both feed
//! the same sample sink on the reconciliation engine, so downstream code
//! never knows which mode produced a sample.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken`. Stopping is idempotent:
//! cancelling an already-cancelled task is a no-op, and a dropped handle
//! never cancels implicitly.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::reconcile::{ReconciliationEngine, UsagePendingSample};

/// Default interval between pull-mode refreshes.
const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// How refreshed samples reach the engine.
pub enum Delivery {
    /// Poll the gateway every `interval`.
    Poll { interval: Duration },
    /// Consume samples pushed by an external relay (event-driven feeds).
    Push {
        events: mpsc::Receiver<UsagePendingSample>,
    },
}

impl Delivery {
    /// Pull delivery at the default cadence.
    pub fn default_poll() -> Self {
        Delivery::Poll {
            interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

/// Background refresh task for one vault's pending usage.
pub struct UsageRefreshTask {
    engine: Arc<ReconciliationEngine>,
    vault_id: u64,
    credential_id: String,
    delivery: Delivery,
}

impl UsageRefreshTask {
    pub fn new(
        engine: Arc<ReconciliationEngine>,
        vault_id: u64,
        credential_id: impl Into<String>,
        delivery: Delivery,
    ) -> Self {
        Self {
            engine,
            vault_id,
            credential_id: credential_id.into(),
            delivery,
        }
    }

    /// Spawn the task, returning a handle the caller uses to stop it.
    pub fn spawn(self, shutdown: CancellationToken) -> UsageTaskHandle {
        let token = shutdown.clone();
        let join = tokio::spawn(self.run(shutdown));
        UsageTaskHandle { token, join }
    }

    /// Run until the cancellation token fires (or, in push mode, the
    /// sending side hangs up).
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            vault_id = self.vault_id,
            credential_id = %self.credential_id,
            mode = match &self.delivery {
                Delivery::Poll { .. } => "poll",
                Delivery::Push { .. } => "push",
            },
            "Usage refresh task starting"
        );

        match self.delivery {
            Delivery::Poll { interval } => {
                loop {
                    if shutdown.is_cancelled() {
                        break;
                    }

                    self.engine.refresh_pending(&self.credential_id).await;

                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {},
                        _ = shutdown.cancelled() => break,
                    }
                }
            }
            Delivery::Push { mut events } => {
                loop {
                    tokio::select! {
                        event = events.recv() => match event {
                            Some(sample) => {
                                debug!(
                                    vault_id = self.vault_id,
                                    tokens = sample.tokens,
                                    "Ingesting pushed usage sample"
                                );
                                self.engine.ingest_sample(&self.credential_id, sample);
                            }
                            // Relay hung up; nothing more will arrive.
                            None => break,
                        },
                        _ = shutdown.cancelled() => break,
                    }
                }
            }
        }

        info!(vault_id = self.vault_id, "Usage refresh task stopped");
    }
}

/// Handle to a running refresh task.
pub struct UsageTaskHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl UsageTaskHandle {
    /// Request the task to stop. Idempotent: stopping an already-stopped
    /// task is a no-op, not an error.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Stop and wait for the task to exit.
    pub async fn stopped(self) {
        self.token.cancel();
        let _ = self.join.await;
    }
}
