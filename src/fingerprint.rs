//! Content fingerprints for change detection between syncs.
//!
//! The table maps a `/`-separated relative path to the hex SHA-256 of the
//! file's bytes. It is written only after a file's chunks and edges have
//! reached both indexes.
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::persist::{load_json_or_default, write_json_atomic};

/// Hex SHA-256 of `content`.
pub fn hash_content(content: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_ref());
    hex::encode(hasher.finalize())
}

/// Whether a file differs from what was last indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    New,
    Modified,
    Unchanged,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FingerprintTable {
    hashes: BTreeMap<String, String>,
}

impl FingerprintTable {
    pub fn load(path: &Path) -> Result<Self> {
        load_json_or_default(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    pub fn status(&self, rel_path: &str, current_hash: &str) -> FileStatus {
        match self.hashes.get(rel_path) {
            None => FileStatus::New,
            Some(stored) if stored == current_hash => FileStatus::Unchanged,
            Some(_) => FileStatus::Modified,
        }
    }

    pub fn get(&self, rel_path: &str) -> Option<&str> {
        self.hashes.get(rel_path).map(String::as_str)
    }

    pub fn record(&mut self, rel_path: impl Into<String>, hash: impl Into<String>) {
        self.hashes.insert(rel_path.into(), hash.into());
    }

    pub fn remove(&mut self, rel_path: &str) -> Option<String> {
        self.hashes.remove(rel_path)
    }

    pub fn clear(&mut self) {
        self.hashes.clear();
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.hashes.keys().map(String::as_str)
    }

    /// Tracked paths that are absent from `live`.
    pub fn find_deleted<'a>(&'a self, live: &HashSet<String>) -> Vec<&'a str> {
        self.paths().filter(|p| !live.contains(*p)).collect()
    }
}

/// Timestamps of the last full and incremental syncs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncTimes {
    pub last_full_sync: Option<DateTime<Utc>>,
    pub last_incremental_sync: Option<DateTime<Utc>>,
}

impl SyncTimes {
    pub fn load(path: &Path) -> Result<Self> {
        load_json_or_default(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    pub fn mark(&mut self, full: bool, at: DateTime<Utc>) {
        if full {
            self.last_full_sync = Some(at);
        } else {
            self.last_incremental_sync = Some(at);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_hash_content_known_vector() {
        assert_eq!(
            hash_content("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(hash_content("abc"), hash_content(b"abc".to_vec()));
    }

    #[test]
    fn test_status_transitions() {
        let mut table = FingerprintTable::default();
        assert_eq!(table.status("a.py", "h1"), FileStatus::New);

        table.record("a.py", "h1");
        assert_eq!(table.status("a.py", "h1"), FileStatus::Unchanged);
        assert_eq!(table.status("a.py", "h2"), FileStatus::Modified);

        assert_eq!(table.remove("a.py").as_deref(), Some("h1"));
        assert!(table.is_empty());
    }

    #[test]
    fn test_find_deleted() {
        let mut table = FingerprintTable::default();
        table.record("a.py", "1");
        table.record("b.py", "2");
        let live: HashSet<String> = ["b.py".to_string()].into_iter().collect();
        assert_eq!(table.find_deleted(&live), vec!["a.py"]);
    }

    #[test]
    fn test_table_persists_as_flat_map() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file_hashes.json");
        let mut table = FingerprintTable::default();
        table.record("src/a.py", "deadbeef");
        table.save(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw, serde_json::json!({ "src/a.py": "deadbeef" }));
        assert_eq!(FingerprintTable::load(&path).unwrap(), table);
    }

    #[test]
    fn test_sync_times_mark() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("last_sync.json");
        let mut times = SyncTimes::load(&path).unwrap();
        assert!(times.last_full_sync.is_none());

        let now = Utc::now();
        times.mark(false, now);
        times.save(&path).unwrap();

        let back = SyncTimes::load(&path).unwrap();
        assert_eq!(back.last_incremental_sync, Some(now));
        assert!(back.last_full_sync.is_none());
    }
}
