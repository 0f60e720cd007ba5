// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{env, net::SocketAddr, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use metervault_server::api::router;
use metervault_server::config::{markup_from_env, DATA_DIR_ENV};
use metervault_server::crypto::SignatureGate;
use metervault_server::ledger::{HttpLedgerClient, TxOrchestrator};
use metervault_server::pricing::PricingTable;
use metervault_server::state::AppState;
use metervault_server::storage::{paths::DATA_ROOT, FileStore, StoragePaths, VaultRepository};
use metervault_server::usage::{
    Delivery, HttpGatewayClient, ReconciliationEngine, UsageRefreshTask,
};

#[tokio::main]
async fn main() {
    init_tracing();

    // Persistent storage (expected to be an encrypted mount in production).
    let data_dir = env::var(DATA_DIR_ENV).unwrap_or_else(|_| DATA_ROOT.to_string());
    let mut file_store = FileStore::new(StoragePaths::new(&data_dir));
    file_store
        .initialize()
        .expect("failed to initialize storage directory");
    let storage = Arc::new(file_store);

    // External collaborators.
    let ledger = Arc::new(HttpLedgerClient::from_env().expect("invalid ledger configuration"));
    let gateway = Arc::new(HttpGatewayClient::from_env().expect("invalid gateway configuration"));

    let markup_pct = markup_from_env();
    let pricing = Arc::new(PricingTable::default());

    let engine = Arc::new(
        ReconciliationEngine::new(gateway, PricingTable::default(), markup_pct)
            .with_store(storage.clone()),
    );
    match engine.load_persisted() {
        Ok(count) => tracing::info!(count, "Confirmed usage snapshots restored"),
        Err(e) => tracing::warn!(error = %e, "Could not restore attestation snapshots"),
    }

    let orchestrator = Arc::new(TxOrchestrator::new(ledger));
    let gate = Arc::new(SignatureGate::default());

    let state = AppState::new(
        storage.clone(),
        engine.clone(),
        orchestrator,
        gate,
        pricing,
        markup_pct,
    );

    // One refresh task per vault that already carries a credential.
    let shutdown = CancellationToken::new();
    let mut refresh_tasks = Vec::new();
    let vault_repo = VaultRepository::new(&storage);
    match vault_repo.list_all_ids() {
        Ok(vault_ids) => {
            for vault_id in vault_ids {
                let Ok(record) = vault_repo.get(vault_id) else {
                    continue;
                };
                if let Some(credential_id) = record.gateway_credential_id {
                    let task = UsageRefreshTask::new(
                        engine.clone(),
                        vault_id,
                        credential_id,
                        Delivery::default_poll(),
                    );
                    refresh_tasks.push(task.spawn(shutdown.child_token()));
                }
            }
        }
        Err(e) => tracing::warn!(error = %e, "Could not enumerate vaults for usage refresh"),
    }
    tracing::info!(tasks = refresh_tasks.len(), "Usage refresh tasks started");

    let app = router(state);

    // Parse bind address.
    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .expect("failed to parse bind address");

    tracing::info!(%addr, "MeterVault server listening (docs at /docs)");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind server address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server failed");

    // Drain background tasks before exit.
    shutdown.cancel();
    for task in refresh_tasks {
        task.stopped().await;
    }
    tracing::info!("Shutdown complete");
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    if env::var("LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
