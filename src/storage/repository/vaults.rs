// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Vault record repository.
//!
//! ## Storage Layout
//!
//! Each vault lives in its own directory:
//! ```text
//! /data/vaults/{vault_id}/
//!   meta.json         # Vault metadata (owner, provider, balance mirror)
//!   credential.json   # Protected credential (ciphertext + salt, no key)
//! ```
//!
//! The ledger is the source of truth for `vault_id` and `balance`; the
//! local record is a bookkeeping mirror updated after finalized
//! transactions. The credential file holds only AEAD ciphertext — the
//! decryption key is re-derivable solely from the owner identity.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::super::{FileStore, StorageError, StorageResult};
use crate::crypto::ProtectedCredential;
use crate::models::OwnerAddress;

/// How vault spending entitlement is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EntitlementKind {
    /// A fixed allowance for the subscription period.
    Fixed,
    /// Entitlement scales with the deposited balance.
    Dynamic,
}

impl EntitlementKind {
    /// Spelling used in ledger script arguments.
    pub fn as_script_arg(self) -> &'static str {
        match self {
            EntitlementKind::Fixed => "fixed",
            EntitlementKind::Dynamic => "dynamic",
        }
    }
}

/// Vault metadata stored in meta.json.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VaultRecord {
    /// Ledger-assigned id; globally unique and immutable.
    pub vault_id: u64,
    /// Wallet address of the vault owner.
    pub owner: OwnerAddress,
    /// Downstream gateway provider this vault subscribes to.
    pub provider: String,
    /// Last-known balance mirror; the ledger holds the authoritative value.
    pub balance: Decimal,
    pub entitlement: EntitlementKind,
    pub withdraw_limit: Decimal,
    pub valid_until: DateTime<Utc>,
    /// Models this subscription is entitled to call.
    pub selected_models: BTreeSet<String>,
    /// Non-secret gateway credential id used for usage queries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_credential_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Repository for vault records and their protected credentials.
pub struct VaultRepository<'a> {
    store: &'a FileStore,
}

impl<'a> VaultRepository<'a> {
    pub fn new(store: &'a FileStore) -> Self {
        Self { store }
    }

    /// Check if a vault record exists.
    pub fn exists(&self, vault_id: u64) -> bool {
        self.store.exists(self.store.paths().vault_meta(vault_id))
    }

    /// Get a vault record by id.
    pub fn get(&self, vault_id: u64) -> StorageResult<VaultRecord> {
        let path = self.store.paths().vault_meta(vault_id);
        if !self.store.exists(&path) {
            return Err(StorageError::NotFound(format!("vault {vault_id}")));
        }
        self.store.read_json(path)
    }

    /// Create a new vault record.
    pub fn create(&self, record: &VaultRecord) -> StorageResult<()> {
        if self.exists(record.vault_id) {
            return Err(StorageError::AlreadyExists(format!(
                "vault {}",
                record.vault_id
            )));
        }
        self.store
            .write_json(self.store.paths().vault_meta(record.vault_id), record)
    }

    /// Update an existing vault record.
    pub fn update(&self, record: &VaultRecord) -> StorageResult<()> {
        if !self.exists(record.vault_id) {
            return Err(StorageError::NotFound(format!("vault {}", record.vault_id)));
        }
        self.store
            .write_json(self.store.paths().vault_meta(record.vault_id), record)
    }

    /// Mirror a finalized top-up into the local balance.
    pub fn record_deposit(&self, vault_id: u64, amount: Decimal) -> StorageResult<VaultRecord> {
        let mut record = self.get(vault_id)?;
        record.balance += amount;
        self.update(&record)?;
        Ok(record)
    }

    /// Store the protected credential for a vault and remember its gateway
    /// credential id.
    ///
    /// Re-issuing writes a fresh record; the previous ciphertext is
    /// replaced, never mutated in place.
    pub fn set_credential(
        &self,
        vault_id: u64,
        gateway_credential_id: &str,
        credential: &ProtectedCredential,
    ) -> StorageResult<()> {
        let mut record = self.get(vault_id)?;
        record.gateway_credential_id = Some(gateway_credential_id.to_string());
        self.update(&record)?;

        self.store
            .write_json(self.store.paths().vault_credential(vault_id), credential)
    }

    /// Get a vault's protected credential, if one has been stored.
    pub fn get_credential(&self, vault_id: u64) -> StorageResult<Option<ProtectedCredential>> {
        let path = self.store.paths().vault_credential(vault_id);
        if !self.store.exists(&path) {
            return Ok(None);
        }
        self.store.read_json(path).map(Some)
    }

    /// List all known vault ids.
    pub fn list_all_ids(&self) -> StorageResult<Vec<u64>> {
        let names = self.store.list_dirs(self.store.paths().vaults_dir())?;
        Ok(names.iter().filter_map(|n| n.parse().ok()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::cipher;
    use crate::storage::StoragePaths;

    fn test_store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(StoragePaths::new(dir.path()));
        store.initialize().unwrap();
        (dir, store)
    }

    fn sample_record(vault_id: u64) -> VaultRecord {
        VaultRecord {
            vault_id,
            owner: OwnerAddress::from("0xA11CE"),
            provider: "openrouter".to_string(),
            balance: Decimal::from(100),
            entitlement: EntitlementKind::Dynamic,
            withdraw_limit: Decimal::from(10),
            valid_until: Utc::now(),
            selected_models: ["gpt-4o".to_string()].into_iter().collect(),
            gateway_credential_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn create_get_roundtrip() {
        let (_dir, store) = test_store();
        let repo = VaultRepository::new(&store);

        let record = sample_record(42);
        repo.create(&record).unwrap();

        let read = repo.get(42).unwrap();
        assert_eq!(read, record);
    }

    #[test]
    fn create_twice_fails() {
        let (_dir, store) = test_store();
        let repo = VaultRepository::new(&store);

        repo.create(&sample_record(42)).unwrap();
        let err = repo.create(&sample_record(42)).unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
    }

    #[test]
    fn get_missing_vault_fails() {
        let (_dir, store) = test_store();
        let repo = VaultRepository::new(&store);

        let err = repo.get(999).unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn record_deposit_adds_to_balance() {
        let (_dir, store) = test_store();
        let repo = VaultRepository::new(&store);

        repo.create(&sample_record(42)).unwrap();
        let updated = repo.record_deposit(42, Decimal::from(25)).unwrap();
        assert_eq!(updated.balance, Decimal::from(125));
    }

    #[test]
    fn credential_store_and_fetch() {
        let (_dir, store) = test_store();
        let repo = VaultRepository::new(&store);

        repo.create(&sample_record(42)).unwrap();
        assert!(repo.get_credential(42).unwrap().is_none());

        let protected =
            cipher::encrypt("sk-secret", &OwnerAddress::from("0xA11CE")).unwrap();
        repo.set_credential(42, "cred-1", &protected).unwrap();

        let stored = repo.get_credential(42).unwrap().unwrap();
        assert_eq!(stored, protected);
        assert_eq!(
            repo.get(42).unwrap().gateway_credential_id.as_deref(),
            Some("cred-1")
        );
    }

    #[test]
    fn list_all_ids_parses_directories() {
        let (_dir, store) = test_store();
        let repo = VaultRepository::new(&store);

        repo.create(&sample_record(1)).unwrap();
        repo.create(&sample_record(7)).unwrap();

        let mut ids = repo.list_all_ids().unwrap();
        ids.sort();
        assert_eq!(ids, vec![1, 7]);
    }
}
