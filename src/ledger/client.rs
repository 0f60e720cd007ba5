// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger access-node client.
//!
//! The boundary is two calls: submit a filled script template, and read back
//! a status snapshot. Everything else the orchestrator does is built on
//! these.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::types::{LedgerArg, LedgerStatus, TxState};
use crate::config::{env_or_default, LEDGER_API_BASE_URL_ENV};

const DEFAULT_LEDGER_BASE_URL: &str = "http://localhost:8545";

/// Errors from ledger access-node communication.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger configuration invalid: {0}")]
    InvalidConfig(String),

    #[error("ledger request failed: {0}")]
    Request(String),

    #[error("ledger response was invalid: {0}")]
    InvalidResponse(String),
}

/// Transport used by the orchestrator to reach the ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit a filled script template, returning the ledger's transaction id.
    async fn submit_transaction(
        &self,
        script: &str,
        args: &[LedgerArg],
    ) -> Result<String, LedgerError>;

    /// Read the current status snapshot for a previously submitted transaction.
    async fn transaction_status(&self, tx_id: &str) -> Result<LedgerStatus, LedgerError>;
}

/// HTTP client for the ledger access node.
#[derive(Debug, Clone)]
pub struct HttpLedgerClient {
    base_url: String,
    http: Client,
}

impl HttpLedgerClient {
    /// Build a client against an explicit base URL.
    pub fn new(base_url: &str) -> Result<Self, LedgerError> {
        let parsed: url::Url = base_url
            .parse()
            .map_err(|e: url::ParseError| LedgerError::InvalidConfig(e.to_string()))?;

        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| LedgerError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: parsed.to_string().trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Build a client from `LEDGER_API_BASE_URL`, defaulting to a local node.
    pub fn from_env() -> Result<Self, LedgerError> {
        Self::new(&env_or_default(
            LEDGER_API_BASE_URL_ENV,
            DEFAULT_LEDGER_BASE_URL,
        ))
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn submit_transaction(
        &self,
        script: &str,
        args: &[LedgerArg],
    ) -> Result<String, LedgerError> {
        let payload = json!({
            "script": script,
            "arguments": args,
        });

        let response = self
            .http
            .post(format!("{}/v1/transactions", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| LedgerError::Request(e.to_string()))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| LedgerError::InvalidResponse(e.to_string()))?;

        if !status.is_success() {
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(LedgerError::Request(format!(
                "submission rejected ({status}): {message}"
            )));
        }

        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                LedgerError::InvalidResponse("missing transaction id in response".to_string())
            })
    }

    async fn transaction_status(&self, tx_id: &str) -> Result<LedgerStatus, LedgerError> {
        let response = self
            .http
            .get(format!("{}/v1/transactions/{tx_id}", self.base_url))
            .send()
            .await
            .map_err(|e| LedgerError::Request(e.to_string()))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| LedgerError::InvalidResponse(e.to_string()))?;

        parse_status(&body)
    }
}

/// Map a status payload into [`LedgerStatus`].
///
/// Access nodes differ in how they spell the status field; both string
/// names and small integer codes are accepted.
pub(crate) fn parse_status(body: &Value) -> Result<LedgerStatus, LedgerError> {
    let state = match body.get("status") {
        Some(Value::String(s)) => parse_state_name(s)?,
        Some(Value::Number(n)) => {
            let code = n
                .as_u64()
                .ok_or_else(|| LedgerError::InvalidResponse(format!("bad status code: {n}")))?;
            parse_state_code(code)?
        }
        other => {
            return Err(LedgerError::InvalidResponse(format!(
                "missing or malformed status field: {other:?}"
            )))
        }
    };

    let log_lines = body
        .get("logs")
        .or_else(|| body.get("log_lines"))
        .and_then(Value::as_array)
        .map(|lines| {
            lines
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(LedgerStatus {
        state,
        block_id: body
            .get("block_id")
            .and_then(Value::as_str)
            .map(str::to_string),
        log_lines,
        error_message: body
            .get("error_message")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn parse_state_name(name: &str) -> Result<TxState, LedgerError> {
    match name.to_ascii_lowercase().as_str() {
        "submitted" | "pending" => Ok(TxState::Submitted),
        "included" | "executed" => Ok(TxState::Included),
        "finalized" | "sealed" => Ok(TxState::Finalized),
        "failed" | "expired" => Ok(TxState::Failed),
        other => Err(LedgerError::InvalidResponse(format!(
            "unknown status name: {other}"
        ))),
    }
}

fn parse_state_code(code: u64) -> Result<TxState, LedgerError> {
    match code {
        0 | 1 => Ok(TxState::Submitted),
        2 => Ok(TxState::Included),
        3 => Ok(TxState::Finalized),
        4 => Ok(TxState::Failed),
        other => Err(LedgerError::InvalidResponse(format!(
            "unknown status code: {other}"
        ))),
    }
}
