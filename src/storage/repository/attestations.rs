// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Attestation snapshot repository.
//!
//! The latest confirmed usage snapshot per vault is the billing source of
//! truth between restarts. Only the newest snapshot is retained — confirmed
//! usage is cumulative, so history adds nothing the ledger doesn't already
//! hold.

use super::super::{FileStore, StorageResult};
use crate::usage::UsageConfirmedSnapshot;

/// Repository for the latest confirmed usage snapshot per vault.
pub struct AttestationRepository<'a> {
    store: &'a FileStore,
}

impl<'a> AttestationRepository<'a> {
    pub fn new(store: &'a FileStore) -> Self {
        Self { store }
    }

    /// The latest persisted snapshot for a vault, if any.
    pub fn latest(&self, vault_id: u64) -> StorageResult<Option<UsageConfirmedSnapshot>> {
        let path = self.store.paths().attestation(vault_id);
        if !self.store.exists(&path) {
            return Ok(None);
        }
        self.store.read_json(path).map(Some)
    }

    /// Persist a vault's latest snapshot, replacing any previous one.
    pub fn put(&self, vault_id: u64, snapshot: &UsageConfirmedSnapshot) -> StorageResult<()> {
        self.store
            .write_json(self.store.paths().attestation(vault_id), snapshot)
    }

    /// Load every persisted snapshot, keyed by vault id. Used to rebuild
    /// the in-memory confirmed state on startup.
    pub fn load_all(&self) -> StorageResult<Vec<(u64, UsageConfirmedSnapshot)>> {
        let stems = self
            .store
            .list_files(self.store.paths().attestations_dir(), "json")?;

        let mut snapshots = Vec::with_capacity(stems.len());
        for stem in stems {
            let Ok(vault_id) = stem.parse::<u64>() else {
                continue;
            };
            if let Some(snapshot) = self.latest(vault_id)? {
                snapshots.push((vault_id, snapshot));
            }
        }
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoragePaths;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn test_store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(StoragePaths::new(dir.path()));
        store.initialize().unwrap();
        (dir, store)
    }

    fn snapshot(tokens: u64) -> UsageConfirmedSnapshot {
        UsageConfirmedSnapshot {
            tokens,
            requests: tokens / 100,
            cost: Decimal::from(tokens) / Decimal::from(1000),
            attested_at: Utc::now(),
            attestation_round: Some(3),
        }
    }

    #[test]
    fn put_and_latest_roundtrip() {
        let (_dir, store) = test_store();
        let repo = AttestationRepository::new(&store);

        assert!(repo.latest(7).unwrap().is_none());

        repo.put(7, &snapshot(1000)).unwrap();
        let read = repo.latest(7).unwrap().unwrap();
        assert_eq!(read.tokens, 1000);
        assert_eq!(read.attestation_round, Some(3));
    }

    #[test]
    fn put_replaces_previous() {
        let (_dir, store) = test_store();
        let repo = AttestationRepository::new(&store);

        repo.put(7, &snapshot(1000)).unwrap();
        repo.put(7, &snapshot(2000)).unwrap();

        assert_eq!(repo.latest(7).unwrap().unwrap().tokens, 2000);
    }

    #[test]
    fn load_all_rebuilds_state() {
        let (_dir, store) = test_store();
        let repo = AttestationRepository::new(&store);

        repo.put(1, &snapshot(100)).unwrap();
        repo.put(2, &snapshot(200)).unwrap();

        let mut all = repo.load_all().unwrap();
        all.sort_by_key(|(id, _)| *id);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0, 1);
        assert_eq!(all[1].1.tokens, 200);
    }
}
