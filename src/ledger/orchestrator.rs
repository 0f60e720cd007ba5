// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction orchestration over the ledger client.
//!
//! ## Create-and-Protect
//!
//! Vault creation is a two-transaction compound: create the vault, extract
//! its ledger-assigned id from the execution log, issue a gateway
//! credential, encrypt it under the owner's derived key, and store the
//! ciphertext back on the ledger. The two submissions run sequentially —
//! the second depends on the extracted id.
//!
//! If the second transaction fails the overall operation is a PARTIAL
//! success, not a failure: funds already moved, the vault exists, and the
//! caller must be able to tell the user "vault created, add your key
//! later" instead of an opaque error.
//!
//! ## Idempotency
//!
//! Finality confirmation can time out while the underlying operation still
//! succeeds, so mutating operations carry a client-generated intent token.
//! The token is forwarded to the ledger for server-side dedup and guards
//! against concurrent duplicate submission locally.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::client::{LedgerClient, LedgerError};
use super::log_scan::{self, IdentifierExtractionFailed};
use super::types::{
    LedgerArg, TransactionHandle, TransactionRecord, TxState, CREATE_VAULT_SCRIPT,
    FUND_VAULT_SCRIPT, STORE_CREDENTIAL_SCRIPT,
};
use crate::crypto::cipher::{self, CipherError, ProtectedCredential};
use crate::models::OwnerAddress;
use crate::storage::EntitlementKind;

/// Default interval between status polls while awaiting finality.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Errors from transaction orchestration.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Finality was not observed in time. The underlying ledger operation
    /// is NOT cancelled and may still finalize; re-poll for the result.
    #[error("transaction {tx_id} not finalized within {timeout:?}")]
    Timeout { tx_id: String, timeout: Duration },

    #[error(transparent)]
    IdentifierExtraction(#[from] IdentifierExtractionFailed),

    #[error("an operation with intent token {0} is already in flight")]
    DuplicateIntent(String),

    #[error("transaction {tx_id} failed on the ledger: {message}")]
    TransactionFailed { tx_id: String, message: String },

    #[error("gateway credential issuance failed: {0}")]
    CredentialIssuance(String),

    #[error(transparent)]
    Cipher(#[from] CipherError),
}

/// Parameters for the Create-and-Protect compound operation.
#[derive(Debug, Clone)]
pub struct CreateVaultParams {
    pub owner: OwnerAddress,
    pub provider: String,
    pub deposit: Decimal,
    pub entitlement: EntitlementKind,
    pub withdraw_limit: Decimal,
    pub valid_until: DateTime<Utc>,
    /// Client-generated idempotency token for this creation intent.
    pub intent_token: String,
    /// How long to wait for each transaction to finalize.
    pub finalize_timeout: Duration,
}

/// A freshly issued gateway credential, before protection.
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    /// Non-secret identifier used for usage queries.
    pub credential_id: String,
    /// The secret itself; encrypted immediately, never persisted in clear.
    pub secret: String,
}

/// Result of Create-and-Protect. `credential_stored == false` with a
/// populated `store_error` is the partial-success case.
#[derive(Debug, Clone)]
pub struct CreateAndProtectOutcome {
    pub vault_id: u64,
    pub create_tx_id: String,
    pub block_id: Option<String>,
    pub credential_stored: bool,
    pub store_error: Option<String>,
    pub gateway_credential_id: String,
    pub credential: ProtectedCredential,
}

/// Submits operations to the ledger and tracks them to finality.
pub struct TxOrchestrator {
    client: Arc<dyn LedgerClient>,
    poll_interval: Duration,
    in_flight: Mutex<HashSet<String>>,
}

/// Releases the intent token when the owning operation completes.
#[derive(Debug)]
struct IntentGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    token: String,
}

impl Drop for IntentGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(&self.token);
        }
    }
}

impl TxOrchestrator {
    pub fn new(client: Arc<dyn LedgerClient>) -> Self {
        Self {
            client,
            poll_interval: DEFAULT_POLL_INTERVAL,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Override the status poll interval (tests, fast local ledgers).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Submit an operation; the returned handle starts at `Submitted`.
    pub async fn submit(
        &self,
        script: &str,
        args: Vec<LedgerArg>,
    ) -> Result<TransactionHandle, OrchestratorError> {
        let tx_id = self.client.submit_transaction(script, &args).await?;
        debug!(tx_id = %tx_id, "Transaction submitted");
        Ok(TransactionHandle { tx_id })
    }

    /// Poll until the transaction reaches `Finalized` or `Failed`, or the
    /// timeout elapses.
    ///
    /// Timing out only detaches this waiter; the remote operation continues
    /// and may still finalize. Dropping the returned future likewise leaves
    /// the ledger untouched.
    pub async fn await_finalized(
        &self,
        handle: &TransactionHandle,
        timeout: Duration,
    ) -> Result<TransactionRecord, OrchestratorError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let status = self.client.transaction_status(&handle.tx_id).await?;

            if status.state.is_terminal() {
                return Ok(TransactionRecord::from_status(&handle.tx_id, status));
            }
            if status.state == TxState::Included {
                debug!(tx_id = %handle.tx_id, "Transaction included, awaiting finality");
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(OrchestratorError::Timeout {
                    tx_id: handle.tx_id.clone(),
                    timeout,
                });
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Create a vault, then issue and store a protected credential for it.
    ///
    /// `issue_credential` is the out-of-band gateway provisioning step,
    /// invoked only once the vault id is known.
    pub async fn create_and_protect<F, Fut>(
        &self,
        params: CreateVaultParams,
        issue_credential: F,
    ) -> Result<CreateAndProtectOutcome, OrchestratorError>
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = Result<IssuedCredential, String>>,
    {
        let _intent = self.begin_intent(&params.intent_token)?;

        let args = vec![
            LedgerArg::String(params.provider.clone()),
            LedgerArg::Amount(params.deposit.to_string()),
            LedgerArg::String(params.entitlement.as_script_arg().to_string()),
            LedgerArg::Amount(params.withdraw_limit.to_string()),
            LedgerArg::UInt64(params.valid_until.timestamp().max(0) as u64),
        ];

        let handle = self.submit(CREATE_VAULT_SCRIPT, args).await?;
        let record = self.await_finalized(&handle, params.finalize_timeout).await?;

        if record.state == TxState::Failed {
            return Err(OrchestratorError::TransactionFailed {
                tx_id: record.id,
                message: record
                    .error_message
                    .unwrap_or_else(|| "no error message reported".to_string()),
            });
        }

        // Hard failure when the log carries no id: everything downstream is
        // keyed by it.
        let vault_id = log_scan::extract_identifier(&record.log_lines)?;
        info!(vault_id, tx_id = %record.id, "Vault created on ledger");

        let issued = issue_credential(vault_id)
            .await
            .map_err(OrchestratorError::CredentialIssuance)?;
        let protected = cipher::encrypt(&issued.secret, &params.owner)?;

        let store_intent = format!("{}:store", params.intent_token);
        match self
            .store_credential_tx(vault_id, &protected, &store_intent, params.finalize_timeout)
            .await
        {
            Ok(store_record) => {
                info!(vault_id, tx_id = %store_record.id, "Credential stored on ledger");
                Ok(CreateAndProtectOutcome {
                    vault_id,
                    create_tx_id: record.id,
                    block_id: record.block_id,
                    credential_stored: true,
                    store_error: None,
                    gateway_credential_id: issued.credential_id,
                    credential: protected,
                })
            }
            Err(e) => {
                // Funds moved and the vault exists; surface the partial
                // state instead of failing the whole operation.
                warn!(vault_id, error = %e, "Vault created but credential storage failed");
                Ok(CreateAndProtectOutcome {
                    vault_id,
                    create_tx_id: record.id,
                    block_id: record.block_id,
                    credential_stored: false,
                    store_error: Some(e.to_string()),
                    gateway_credential_id: issued.credential_id,
                    credential: protected,
                })
            }
        }
    }

    /// Store a protected credential against an existing vault.
    ///
    /// Also the recovery path after a partial Create-and-Protect; safe to
    /// retry with the same intent token.
    pub async fn store_credential(
        &self,
        vault_id: u64,
        credential: &ProtectedCredential,
        intent_token: &str,
        timeout: Duration,
    ) -> Result<TransactionRecord, OrchestratorError> {
        let _intent = self.begin_intent(intent_token)?;
        self.store_credential_tx(vault_id, credential, intent_token, timeout)
            .await
    }

    /// Top up the balance of an existing vault.
    pub async fn fund_vault(
        &self,
        vault_id: u64,
        amount: Decimal,
        intent_token: &str,
        timeout: Duration,
    ) -> Result<TransactionRecord, OrchestratorError> {
        let _intent = self.begin_intent(intent_token)?;

        let args = vec![
            LedgerArg::UInt64(vault_id),
            LedgerArg::Amount(amount.to_string()),
            LedgerArg::String(intent_token.to_string()),
        ];
        let handle = self.submit(FUND_VAULT_SCRIPT, args).await?;
        let record = self.await_finalized(&handle, timeout).await?;

        if record.state == TxState::Failed {
            return Err(OrchestratorError::TransactionFailed {
                tx_id: record.id,
                message: record
                    .error_message
                    .unwrap_or_else(|| "no error message reported".to_string()),
            });
        }
        info!(vault_id, tx_id = %record.id, amount = %amount, "Vault topped up");
        Ok(record)
    }

    async fn store_credential_tx(
        &self,
        vault_id: u64,
        credential: &ProtectedCredential,
        intent_token: &str,
        timeout: Duration,
    ) -> Result<TransactionRecord, OrchestratorError> {
        let args = vec![
            LedgerArg::UInt64(vault_id),
            LedgerArg::String(credential.ciphertext.clone()),
            LedgerArg::String(credential.salt.clone()),
            LedgerArg::String(intent_token.to_string()),
        ];
        let handle = self.submit(STORE_CREDENTIAL_SCRIPT, args).await?;
        let record = self.await_finalized(&handle, timeout).await?;

        if record.state == TxState::Failed {
            return Err(OrchestratorError::TransactionFailed {
                tx_id: record.id,
                message: record
                    .error_message
                    .unwrap_or_else(|| "no error message reported".to_string()),
            });
        }
        Ok(record)
    }

    fn begin_intent(&self, token: &str) -> Result<IntentGuard<'_>, OrchestratorError> {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if !in_flight.insert(token.to_string()) {
            return Err(OrchestratorError::DuplicateIntent(token.to_string()));
        }

        Ok(IntentGuard {
            in_flight: &self.in_flight,
            token: token.to_string(),
        })
    }
}
