// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration Constants
//!
//! This module defines environment variable names and default values used
//! throughout the application. Configuration is loaded from the environment
//! at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Root directory for persistent storage | `/data` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `LEDGER_API_BASE_URL` | Ledger access-node endpoint | `http://localhost:8545` |
//! | `GATEWAY_API_BASE_URL` | LLM-gateway usage endpoint | `http://localhost:4000` |
//! | `PRICING_MARKUP_PCT` | Marketplace markup percentage (0-500) | `0` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::str::FromStr;

use rust_decimal::Decimal;

/// Environment variable name for the persistent data directory path.
///
/// The data directory is expected to be an encrypted mount in production.
/// All vault records, protected credentials, attestation snapshots, and
/// audit logs are stored here.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

/// Environment variable name for the ledger access-node base URL.
pub const LEDGER_API_BASE_URL_ENV: &str = "LEDGER_API_BASE_URL";

/// Environment variable name for the gateway usage-endpoint base URL.
pub const GATEWAY_API_BASE_URL_ENV: &str = "GATEWAY_API_BASE_URL";

/// Environment variable name for the marketplace markup percentage.
pub const PRICING_MARKUP_PCT_ENV: &str = "PRICING_MARKUP_PCT";

/// Read an environment variable, falling back to a default.
pub fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Read the configured markup percentage. Unparseable or missing values
/// fall back to zero; range clamping happens in the pricing table.
pub fn markup_from_env() -> Decimal {
    std::env::var(PRICING_MARKUP_PCT_ENV)
        .ok()
        .and_then(|raw| Decimal::from_str(&raw).ok())
        .unwrap_or(Decimal::ZERO)
}
