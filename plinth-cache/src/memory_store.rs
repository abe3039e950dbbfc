//! In-memory tag store.
//!
//! A `RwLock<HashMap>` store used as the "memory" adapter and as the default
//! test double for the cache front-end. Entries keep their tag set and expiry
//! inline; expired entries stay in the map until `prune`.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use plinth_core::CacheError;
use serde_json::Value;

use crate::store::{CacheResult, StoreStats, TagStore};

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Value,
    tags: HashSet<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl MemoryEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// In-memory store with tag sets and expiry.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
    stats: RwLock<StoreStats>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> CacheError {
        CacheError::Store {
            reason: "lock poisoned".to_string(),
        }
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
}

impl TagStore for MemoryStore {
    fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        let now = Utc::now();
        let value = entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone());
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
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                tags: tags.iter().cloned().collect(),
                expires_at,
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        Ok(entries.remove(key).is_some())
    }

    fn invalidate_tags(&self, tags: &[String]) -> CacheResult<u64> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        let before = entries.len();
        entries.retain(|_, entry| !tags.iter().any(|tag| entry.tags.contains(tag)));
        Ok((before - entries.len()) as u64)
    }

    fn clear(&self) -> CacheResult<()> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        entries.clear();
        Ok(())
    }

    fn prune(&self) -> CacheResult<u64> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        let now = Utc::now();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok((before - entries.len()) as u64)
    }

    fn stats(&self) -> CacheResult<StoreStats> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        let mut stats = self
            .stats
            .read()
            .map_err(|_| Self::poisoned())?
            .clone();
        stats.entry_count = entries.len() as u64;
        Ok(stats)
    }
}
