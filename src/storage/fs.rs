// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Filesystem-backed record store.
//!
//! All persistent state (vault records, protected credentials, attestation
//! snapshots, audit logs) lives as JSON files under the data root. The data
//! root is expected to be an encrypted mount in production; this module
//! performs standard filesystem I/O with atomic replace-on-write so a crash
//! mid-write never leaves a half-written record.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};

use super::StoragePaths;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("storage not initialized")]
    NotInitialized,
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// File-backed store for JSON records and append-only logs.
#[derive(Debug, Clone)]
pub struct FileStore {
    paths: StoragePaths,
    initialized: bool,
}

impl FileStore {
    /// Create a new FileStore.
    ///
    /// Does NOT create the directory structure. Call `initialize()` first.
    pub fn new(paths: StoragePaths) -> Self {
        Self {
            paths,
            initialized: false,
        }
    }

    /// Get the storage paths.
    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    /// Initialize the storage directory structure.
    ///
    /// Safe to call multiple times (idempotent).
    pub fn initialize(&mut self) -> StorageResult<()> {
        let dirs = [
            self.paths.vaults_dir(),
            self.paths.attestations_dir(),
            self.paths.audit_dir(),
        ];

        for dir in dirs {
            fs::create_dir_all(&dir)?;
        }

        self.initialized = true;
        Ok(())
    }

    /// Check that the data directory accepts writes and reads them back.
    pub fn health_check(&self) -> StorageResult<()> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }

        let test_file = self.paths.root().join(".health_check");
        let test_data = b"health_check_data";

        fs::write(&test_file, test_data)?;
        let read_data = fs::read(&test_file)?;
        fs::remove_file(&test_file)?;

        if read_data != test_data {
            return Err(StorageError::Io(std::io::Error::other(
                "health check data mismatch",
            )));
        }

        Ok(())
    }

    /// Read a JSON file and deserialize it.
    pub fn read_json<T: DeserializeOwned>(&self, path: impl AsRef<Path>) -> StorageResult<T> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }

        let file = File::open(path.as_ref())?;
        let reader = BufReader::new(file);
        let value = serde_json::from_reader(reader)?;
        Ok(value)
    }

    /// Write a JSON file (atomic write via rename).
    pub fn write_json<T: Serialize>(&self, path: impl AsRef<Path>, value: &T) -> StorageResult<()> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }

        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write to temp file first, then rename for atomicity.
        let temp_path = path.with_extension("tmp");
        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, value)?;
            writer.flush()?;
        }

        fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// Check if a file exists.
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        File::open(path.as_ref()).is_ok()
    }

    /// Delete a file.
    pub fn delete(&self, path: impl AsRef<Path>) -> StorageResult<()> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }
        fs::remove_file(path.as_ref())?;
        Ok(())
    }

    /// List all subdirectories in a directory.
    pub fn list_dirs(&self, dir: impl AsRef<Path>) -> StorageResult<Vec<String>> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }

        let dir = dir.as_ref();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    /// List all files in a directory with the given extension, returning
    /// their stems.
    pub fn list_files(&self, dir: impl AsRef<Path>, extension: &str) -> StorageResult<Vec<String>> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }

        let dir = dir.as_ref();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == extension) {
                if let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) {
                    ids.push(id.to_string());
                }
            }
        }
        Ok(ids)
    }

    /// Append a single line to a log file, creating it (and parents) if
    /// missing.
    pub fn append_line(&self, path: impl AsRef<Path>, line: &str) -> StorageResult<()> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }

        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        Ok(())
    }

    /// Read a whole file as raw bytes.
    pub fn read_raw(&self, path: impl AsRef<Path>) -> StorageResult<Vec<u8>> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }

        let mut file = File::open(path.as_ref())?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    fn test_store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(StoragePaths::new(dir.path()));
        store.initialize().expect("initialize test store");
        (dir, store)
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct TestData {
        id: String,
        value: i32,
    }

    #[test]
    fn initialize_creates_directories() {
        let (_dir, store) = test_store();

        assert!(store.paths().vaults_dir().exists());
        assert!(store.paths().attestations_dir().exists());
        assert!(store.paths().audit_dir().exists());
    }

    #[test]
    fn write_and_read_json() {
        let (_dir, store) = test_store();
        let data = TestData {
            id: "test-1".to_string(),
            value: 42,
        };

        let path = store.paths().vault_meta(1);
        store.write_json(&path, &data).unwrap();

        let read: TestData = store.read_json(&path).unwrap();
        assert_eq!(read, data);
    }

    #[test]
    fn write_json_replaces_atomically() {
        let (_dir, store) = test_store();
        let path = store.paths().vault_meta(1);

        store
            .write_json(&path, &TestData { id: "a".into(), value: 1 })
            .unwrap();
        store
            .write_json(&path, &TestData { id: "a".into(), value: 2 })
            .unwrap();

        let read: TestData = store.read_json(&path).unwrap();
        assert_eq!(read.value, 2);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn append_line_accumulates() {
        let (_dir, store) = test_store();
        let path = store.paths().audit_events_file("2026-01-01");

        store.append_line(&path, "{\"a\":1}").unwrap();
        store.append_line(&path, "{\"a\":2}").unwrap();

        let raw = store.read_raw(&path).unwrap();
        let text = String::from_utf8(raw).unwrap();
        assert_eq!(text, "{\"a\":1}\n{\"a\":2}\n");
    }

    #[test]
    fn delete_file_removes_it() {
        let (_dir, store) = test_store();
        let path = store.paths().vault_meta(1);

        store
            .write_json(&path, &TestData { id: "d".into(), value: 0 })
            .unwrap();
        assert!(store.exists(&path));

        store.delete(&path).unwrap();
        assert!(!store.exists(&path));
    }

    #[test]
    fn list_dirs_returns_names() {
        let (_dir, store) = test_store();

        for id in 1..=3u64 {
            store
                .write_json(&store.paths().vault_meta(id), &TestData {
                    id: id.to_string(),
                    value: 0,
                })
                .unwrap();
        }

        let mut names = store.list_dirs(store.paths().vaults_dir()).unwrap();
        names.sort();
        assert_eq!(names, vec!["1", "2", "3"]);
    }

    #[test]
    fn list_files_returns_stems() {
        let (_dir, store) = test_store();

        for id in [5u64, 9] {
            store
                .write_json(&store.paths().attestation(id), &TestData {
                    id: id.to_string(),
                    value: 0,
                })
                .unwrap();
        }

        let mut stems = store
            .list_files(store.paths().attestations_dir(), "json")
            .unwrap();
        stems.sort();
        assert_eq!(stems, vec!["5", "9"]);
    }

    #[test]
    fn uninitialized_store_returns_error() {
        let store = FileStore::new(StoragePaths::new("/tmp/never-init"));
        let result = store.read_json::<TestData>("/tmp/any.json");
        assert!(matches!(result, Err(StorageError::NotInitialized)));
    }
}
