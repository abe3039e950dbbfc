//! LMDB-backed tag store.
//!
//! The "file" adapter: a filesystem-rooted store using the heed crate (Rust
//! bindings for LMDB). The optional namespace maps to a named LMDB database
//! so several sites can share one environment directory.
//!
//! # Record layout
//!
//! Values are stored as `[expires_at_millis: 8 bytes BE][JSON record]` where
//! the JSON record is `{"tags": [...], "value": ...}`. An expiry of i64::MAX
//! means "never expires". The prefix keeps expiry checks cheap: pruning can
//! decide from the first 8 bytes without parsing the JSON body.

use std::path::Path;
use std::sync::RwLock;

use chrono::{DateTime, TimeZone, Utc};
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use plinth_core::CacheError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::{CacheResult, StoreStats, TagStore};

/// Expiry sentinel for entries that never expire.
const NO_EXPIRY: i64 = i64::MAX;

/// Default LMDB map size in megabytes.
pub const DEFAULT_MAP_SIZE_MB: usize = 64;

#[derive(Debug, Serialize, Deserialize)]
struct DiskRecord {
    tags: Vec<String>,
    value: Value,
}

/// LMDB-backed store rooted at a configured directory.
pub struct LmdbStore {
    env: Env,
    db: Database<Str, Bytes>,
    stats: RwLock<StoreStats>,
}

impl LmdbStore {
    /// Open (or create) a store at `path`.
    ///
    /// An empty `namespace` selects the unnamed default database.
    pub fn open<P: AsRef<Path>>(
        path: P,
        namespace: &str,
        max_size_mb: usize,
    ) -> Result<Self, CacheError> {
        std::fs::create_dir_all(&path).map_err(|e| CacheError::BackendUnavailable {
            adapter: "file".to_string(),
            reason: e.to_string(),
        })?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| CacheError::BackendUnavailable {
            adapter: "file".to_string(),
            reason: e.to_string(),
        })?;

        let mut wtxn = env.write_txn().map_err(Self::txn_error)?;
        let name = if namespace.is_empty() {
            None
        } else {
            Some(namespace)
        };
        let db: Database<Str, Bytes> = env
            .create_database(&mut wtxn, name)
            .map_err(|e| CacheError::BackendUnavailable {
                adapter: "file".to_string(),
                reason: e.to_string(),
            })?;
        wtxn.commit().map_err(Self::txn_error)?;

        Ok(Self {
            env,
            db,
            stats: RwLock::new(StoreStats::default()),
        })
    }

    fn txn_error(e: heed::Error) -> CacheError {
        CacheError::Store {
            reason: e.to_string(),
        }
    }

    fn encode_record(
        value: &Value,
        tags: &[String],
        expires_at: Option<DateTime<Utc>>,
    ) -> CacheResult<Vec<u8>> {
        let record = DiskRecord {
            tags: tags.to_vec(),
            value: value.clone(),
        };
        let body = serde_json::to_vec(&record).map_err(|e| CacheError::Store {
            reason: e.to_string(),
        })?;
        let millis = expires_at.map(|at| at.timestamp_millis()).unwrap_or(NO_EXPIRY);
        let mut bytes = Vec::with_capacity(8 + body.len());
        bytes.extend_from_slice(&millis.to_be_bytes());
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Split the expiry prefix off a stored record.
    fn split_record(bytes: &[u8]) -> Option<(i64, &[u8])> {
        if bytes.len() < 8 {
            return None;
        }
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&bytes[0..8]);
        Some((i64::from_be_bytes(prefix), &bytes[8..]))
    }

    fn is_expired(expires_millis: i64, now: DateTime<Utc>) -> bool {
        expires_millis != NO_EXPIRY
            && matches!(
                Utc.timestamp_millis_opt(expires_millis).single(),
                Some(at) if at <= now
            )
    }

    fn record_hit(&self, hit: bool) {
        if let Ok(mut stats) = self.stats.write() {
            if hit {
                stats.hits += 1;
            } else {
                stats.misses += 1;
            }
        }
    }

    /// Collect keys whose stored record matches `predicate`.
    fn collect_keys<F>(&self, predicate: F) -> CacheResult<Vec<String>>
    where
        F: Fn(i64, &[u8]) -> bool,
    {
        let rtxn = self.env.read_txn().map_err(Self::txn_error)?;
        let iter = self.db.iter(&rtxn).map_err(Self::txn_error)?;

        let mut keys = Vec::new();
        for result in iter {
            let (key, bytes) = result.map_err(Self::txn_error)?;
            if let Some((expires, body)) = Self::split_record(bytes) {
                if predicate(expires, body) {
                    keys.push(key.to_string());
                }
            }
        }
        Ok(keys)
    }

    fn delete_keys(&self, keys: &[String]) -> CacheResult<u64> {
        let mut wtxn = self.env.write_txn().map_err(Self::txn_error)?;
        let mut removed = 0u64;
        for key in keys {
            if self.db.delete(&mut wtxn, key).map_err(Self::txn_error)? {
                removed += 1;
            }
        }
        wtxn.commit().map_err(Self::txn_error)?;
        Ok(removed)
    }
}

impl TagStore for LmdbStore {
    fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        let rtxn = self.env.read_txn().map_err(Self::txn_error)?;
        let bytes = self.db.get(&rtxn, key).map_err(Self::txn_error)?;

        let value = bytes
            .and_then(Self::split_record)
            .filter(|(expires, _)| !Self::is_expired(*expires, Utc::now()))
            .and_then(|(_, body)| serde_json::from_slice::<DiskRecord>(body).ok())
            .map(|record| record.value);
        self.record_hit(value.is_some());
        Ok(value)
    }

    fn set(
        &self,
        key: &str,
        value: Value,
        tags: &[String],
        expires_at: Option<DateTime<Utc>>,
    ) -> CacheResult<()> {
        let bytes = Self::encode_record(&value, tags, expires_at)?;
        let mut wtxn = self.env.write_txn().map_err(Self::txn_error)?;
        self.db
            .put(&mut wtxn, key, &bytes)
            .map_err(Self::txn_error)?;
        wtxn.commit().map_err(Self::txn_error)
    }

    fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(Self::txn_error)?;
        let existed = self.db.delete(&mut wtxn, key).map_err(Self::txn_error)?;
        wtxn.commit().map_err(Self::txn_error)?;
        Ok(existed)
    }

    fn invalidate_tags(&self, tags: &[String]) -> CacheResult<u64> {
        let keys = self.collect_keys(|_, body| {
            serde_json::from_slice::<DiskRecord>(body)
                .map(|record| record.tags.iter().any(|tag| tags.contains(tag)))
                .unwrap_or(false)
        })?;
        self.delete_keys(&keys)
    }

    fn clear(&self) -> CacheResult<()> {
        let mut wtxn = self.env.write_txn().map_err(Self::txn_error)?;
        self.db.clear(&mut wtxn).map_err(Self::txn_error)?;
        wtxn.commit().map_err(Self::txn_error)
    }

    fn prune(&self) -> CacheResult<u64> {
        let now = Utc::now();
        let keys = self.collect_keys(|expires, _| Self::is_expired(expires, now))?;
        self.delete_keys(&keys)
    }

    fn stats(&self) -> CacheResult<StoreStats> {
        let rtxn = self.env.read_txn().map_err(Self::txn_error)?;
        let entry_count = self.db.len(&rtxn).map_err(Self::txn_error)?;
        let mut stats = self
            .stats
            .read()
            .map_err(|_| CacheError::Store {
                reason: "lock poisoned".to_string(),
            })?
            .clone();
        stats.entry_count = entry_count;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> LmdbStore {
        LmdbStore::open(dir.path(), "test", 16).expect("open store")
    }

    #[test]
    fn test_set_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store
            .set("k", json!({"rows": [1, 2]}), &["t".to_string()], None)
            .unwrap();
        assert_eq!(store.get("k").unwrap(), Some(json!({"rows": [1, 2]})));
        assert_eq!(store.get("missing").unwrap(), None);
    }

    #[test]
    fn test_expired_entry_is_miss_until_pruned() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let past = Utc::now() - chrono::Duration::seconds(10);

        store.set("k", json!(1), &[], Some(past)).unwrap();
        assert_eq!(store.get("k").unwrap(), None);
        assert_eq!(store.stats().unwrap().entry_count, 1);

        assert_eq!(store.prune().unwrap(), 1);
        assert_eq!(store.stats().unwrap().entry_count, 0);
    }

    #[test]
    fn test_invalidate_tags() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store
            .set("a", json!(1), &["users".to_string()], None)
            .unwrap();
        store
            .set("b", json!(2), &["posts".to_string()], None)
            .unwrap();

        assert_eq!(store.invalidate_tags(&["users".to_string()]).unwrap(), 1);
        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.get("b").unwrap(), Some(json!(2)));
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.set("a", json!(1), &[], None).unwrap();
        store.clear().unwrap();
        assert_eq!(store.stats().unwrap().entry_count, 0);
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir);
            store.set("k", json!("persisted"), &[], None).unwrap();
        }
        let store = open_store(&dir);
        assert_eq!(store.get("k").unwrap(), Some(json!("persisted")));
    }

    #[test]
    fn test_open_rejects_bad_path() {
        // a file in the way of the directory
        let dir = TempDir::new().unwrap();
        let file_path = dir.path().join("occupied");
        std::fs::write(&file_path, b"x").unwrap();
        assert!(LmdbStore::open(&file_path, "", 16).is_err());
    }
}
