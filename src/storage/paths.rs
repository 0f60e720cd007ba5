// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path constants and utilities for the persistent storage layout.

use std::path::{Path, PathBuf};

/// Base directory for all persistent storage. Expected to be an encrypted
/// mount in production deployments.
pub const DATA_ROOT: &str = "/data";

/// Storage path utilities.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DATA_ROOT)
    }
}

impl StoragePaths {
    /// Create a new StoragePaths with a custom root (useful for testing).
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory for all persistent data.
    pub fn root(&self) -> &Path {
        &self.root
    }

    // ========== Vault Paths ==========

    /// Directory containing all vault records.
    pub fn vaults_dir(&self) -> PathBuf {
        self.root.join("vaults")
    }

    /// Directory for a specific vault.
    pub fn vault_dir(&self, vault_id: u64) -> PathBuf {
        self.vaults_dir().join(vault_id.to_string())
    }

    /// Path to vault metadata file.
    pub fn vault_meta(&self, vault_id: u64) -> PathBuf {
        self.vault_dir(vault_id).join("meta.json")
    }

    /// Path to the vault's protected credential record.
    pub fn vault_credential(&self, vault_id: u64) -> PathBuf {
        self.vault_dir(vault_id).join("credential.json")
    }

    // ========== Attestation Paths ==========

    /// Directory containing the latest confirmed usage snapshot per vault.
    pub fn attestations_dir(&self) -> PathBuf {
        self.root.join("attestations")
    }

    /// Path to a vault's latest confirmed snapshot.
    pub fn attestation(&self, vault_id: u64) -> PathBuf {
        self.attestations_dir().join(format!("{vault_id}.json"))
    }

    // ========== Audit Log Paths ==========

    /// Directory containing audit logs.
    pub fn audit_dir(&self) -> PathBuf {
        self.root.join("audit")
    }

    /// Path to a specific date's audit event log.
    pub fn audit_events_file(&self, date: &str) -> PathBuf {
        self.audit_dir().join(date).join("events.jsonl")
    }
}
