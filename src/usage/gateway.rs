// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Gateway usage-query client.
//!
//! The LLM gateway reports per-credential usage as JSON, but deployments
//! disagree on the envelope: a bare array, `{"data": [...]}`, or
//! `{"logs": [...]}` have all been observed. The envelope is normalized
//! here, at the boundary, into [`GatewayUsageRecord`]s; an unrecognized
//! shape degrades to [`GatewayError::Unavailable`], never a crash.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::warn;

use crate::config::{env_or_default, GATEWAY_API_BASE_URL_ENV};

const DEFAULT_GATEWAY_BASE_URL: &str = "http://localhost:4000";

/// Errors from the gateway usage endpoint.
///
/// The pending signal is non-authoritative, so every failure mode maps to
/// "unavailable" — callers degrade to a cached or zeroed view.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    #[error("gateway configuration invalid: {0}")]
    InvalidConfig(String),
}

/// One normalized usage record from the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayUsageRecord {
    pub tokens: u64,
    pub requests: u64,
    /// Gateway-computed cost, when reported. Absent costs are priced
    /// locally by the reconciliation engine.
    pub cost: Option<Decimal>,
    pub model: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Source of raw usage records for a credential.
#[async_trait]
pub trait UsageSource: Send + Sync {
    /// Usage records for a credential from `since` onward.
    async fn usage_since(
        &self,
        credential_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<GatewayUsageRecord>, GatewayError>;
}

/// HTTP client for the gateway usage endpoint.
#[derive(Debug, Clone)]
pub struct HttpGatewayClient {
    base_url: String,
    http: Client,
}

impl HttpGatewayClient {
    /// Build a client against an explicit base URL.
    pub fn new(base_url: &str) -> Result<Self, GatewayError> {
        let parsed: url::Url = base_url
            .parse()
            .map_err(|e: url::ParseError| GatewayError::InvalidConfig(e.to_string()))?;

        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GatewayError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: parsed.to_string().trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Build a client from `GATEWAY_API_BASE_URL`.
    pub fn from_env() -> Result<Self, GatewayError> {
        Self::new(&env_or_default(
            GATEWAY_API_BASE_URL_ENV,
            DEFAULT_GATEWAY_BASE_URL,
        ))
    }
}

#[async_trait]
impl UsageSource for HttpGatewayClient {
    async fn usage_since(
        &self,
        credential_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<GatewayUsageRecord>, GatewayError> {
        let since_ts = since.to_rfc3339();
        let response = self
            .http
            .get(format!("{}/usage", self.base_url))
            .query(&[("credential", credential_id), ("since", since_ts.as_str())])
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GatewayError::Unavailable(format!(
                "usage query returned {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("undecodable body: {e}")))?;

        parse_usage_payload(&body)
    }
}

/// Normalize a usage payload into records.
///
/// Recognized envelopes: bare array, `{"data": [...]}`, `{"logs": [...]}`.
pub fn parse_usage_payload(body: &Value) -> Result<Vec<GatewayUsageRecord>, GatewayError> {
    let entries = match body {
        Value::Array(entries) => entries,
        Value::Object(map) => map
            .get("data")
            .or_else(|| map.get("logs"))
            .and_then(Value::as_array)
            .ok_or_else(|| {
                GatewayError::Unavailable("unrecognized usage payload shape".to_string())
            })?,
        _ => {
            return Err(GatewayError::Unavailable(
                "unrecognized usage payload shape".to_string(),
            ))
        }
    };

    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        match parse_record(entry) {
            Some(record) => records.push(record),
            None => warn!(entry = %entry, "Skipping unparseable usage record"),
        }
    }
    Ok(records)
}

/// Parse one usage entry; `None` drops entries with no usable token count.
fn parse_record(entry: &Value) -> Option<GatewayUsageRecord> {
    let tokens = read_u64(entry, &["tokens", "total_tokens"])?;
    let requests = read_u64(entry, &["requests", "request_count"]).unwrap_or(1);

    let cost = entry
        .get("cost")
        .and_then(|v| match v {
            Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
            Value::String(s) => Decimal::from_str(s).ok(),
            _ => None,
        });

    let model = entry
        .get("model")
        .and_then(Value::as_str)
        .map(str::to_string);

    let timestamp = entry
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    Some(GatewayUsageRecord {
        tokens,
        requests,
        cost,
        model,
        timestamp,
    })
}

fn read_u64(entry: &Value, keys: &[&str]) -> Option<u64> {
    for key in keys {
        match entry.get(key) {
            Some(Value::Number(n)) => return n.as_u64(),
            Some(Value::String(s)) => return s.parse().ok(),
            _ => {}
        }
    }
    None
}
