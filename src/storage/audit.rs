// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit logging for billing- and credential-sensitive operations.
//!
//! Vault lifecycle, credential access, and attestation decisions are
//! appended to daily JSONL files under the data root.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{FileStore, StorageError, StorageResult};

/// Types of auditable events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Vault lifecycle
    VaultCreated,
    VaultFunded,

    // Credential events
    CredentialStored,
    CredentialRevealed,
    CredentialRevealDeclined,

    // Attestation events
    AttestationRecorded,
    AttestationRejected,
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID.
    pub event_id: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Type of event.
    pub event_type: AuditEventType,
    /// Owner who triggered the event (if known).
    pub owner: Option<String>,
    /// Vault affected (if any).
    pub vault_id: Option<u64>,
    /// Additional details as JSON.
    pub details: Option<serde_json::Value>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Error message if the operation failed.
    pub error: Option<String>,
}

impl AuditEvent {
    /// Create a new audit event.
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            owner: None,
            vault_id: None,
            details: None,
            success: true,
            error: None,
        }
    }

    /// Set the owner.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Set the vault.
    pub fn with_vault(mut self, vault_id: u64) -> Self {
        self.vault_id = Some(vault_id);
        self
    }

    /// Add details.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Mark as failed with an error message.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// Repository for audit events.
pub struct AuditRepository<'a> {
    store: &'a FileStore,
}

impl<'a> AuditRepository<'a> {
    /// Create a new audit repository.
    pub fn new(store: &'a FileStore) -> Self {
        Self { store }
    }

    /// Append an audit event to the day's JSONL file.
    pub fn log(&self, event: &AuditEvent) -> StorageResult<()> {
        let date = event.timestamp.format("%Y-%m-%d").to_string();
        let path = self.store.paths().audit_events_file(&date);
        let line = serde_json::to_string(event)?;
        self.store.append_line(&path, &line)
    }

    /// Read audit events for a specific date.
    pub fn read_events(&self, date: &str) -> StorageResult<Vec<AuditEvent>> {
        let path = self.store.paths().audit_events_file(date);
        let content = self.store.read_raw(&path)?;
        let text = String::from_utf8(content)
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;

        let mut events = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str(line)?);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoragePaths;

    fn test_store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(StoragePaths::new(dir.path()));
        store.initialize().unwrap();
        (dir, store)
    }

    #[test]
    fn log_and_read_back() {
        let (_dir, store) = test_store();
        let audit = AuditRepository::new(&store);

        let event = AuditEvent::new(AuditEventType::VaultCreated)
            .with_owner("0xA11CE")
            .with_vault(42)
            .with_details(serde_json::json!({"deposit": "100"}));
        audit.log(&event).unwrap();

        let rejected = AuditEvent::new(AuditEventType::AttestationRejected)
            .with_vault(42)
            .failed("snapshot moved backwards");
        audit.log(&rejected).unwrap();

        let date = Utc::now().format("%Y-%m-%d").to_string();
        let events = audit.read_events(&date).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, AuditEventType::VaultCreated);
        assert_eq!(events[0].vault_id, Some(42));
        assert!(!events[1].success);
        assert_eq!(
            events[1].error.as_deref(),
            Some("snapshot moved backwards")
        );
    }
}
