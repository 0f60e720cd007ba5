// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Persistent Storage Module
//!
//! JSON-on-filesystem persistence for everything that must survive a
//! restart: vault records, protected credentials, the latest attestation
//! snapshot per vault, and audit logs.
//!
//! ## Storage Layout
//!
//! ```text
//! /data/
//!   vaults/{vault_id}/
//!     meta.json         # Vault metadata (owner, provider, balance mirror)
//!     credential.json   # Protected credential (ciphertext + salt)
//!   attestations/
//!     {vault_id}.json   # Latest confirmed usage snapshot
//!   audit/
//!     {date}/events.jsonl  # Daily audit logs
//! ```
//!
//! Writes are atomic (temp file + rename). The data root is expected to be
//! an encrypted mount in production deployments; no crypto happens in this
//! module — credential ciphertext is produced upstream by the cipher.

pub mod audit;
pub mod fs;
pub mod paths;
pub mod repository;

pub use audit::{AuditEvent, AuditEventType, AuditRepository};
pub use fs::{FileStore, StorageError, StorageResult};
pub use paths::StoragePaths;
pub use repository::{AttestationRepository, EntitlementKind, VaultRecord, VaultRepository};
