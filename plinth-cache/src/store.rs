//! Backend store trait for pluggable cache implementations.
//!
//! The trait abstracts over interchangeable key/value stores (in-memory,
//! LMDB, networked). Implementations must be thread-safe; the calling layer
//! holds them behind a `Box<dyn TagStore>` and never assumes which one it
//! got.

use chrono::{DateTime, Utc};
use plinth_core::CacheError;
use serde_json::Value;

/// Result type for store operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Backend cache store contract.
///
/// Keys arrive already canonicalized (see `SafeKeyer`); stores treat them as
/// opaque strings. Entries carry a tag set for bulk invalidation and an
/// optional absolute expiry instant.
///
/// # Expiry
///
/// An expired entry is a miss for `get` but is only physically reclaimed by
/// `prune` - logical invalidation and space reclamation are distinct
/// operations.
pub trait TagStore: Send + Sync {
    /// Get a value from the store. Expired entries are misses.
    fn get(&self, key: &str) -> CacheResult<Option<Value>>;

    /// Store a value under `key` with the given tags and optional expiry.
    fn set(
        &self,
        key: &str,
        value: Value,
        tags: &[String],
        expires_at: Option<DateTime<Utc>>,
    ) -> CacheResult<()>;

    /// Delete a single entry. Returns whether an entry existed.
    fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Delete every entry carrying at least one of the given tags.
    /// Returns the number of entries removed.
    fn invalidate_tags(&self, tags: &[String]) -> CacheResult<u64>;

    /// Wipe the whole store namespace.
    fn clear(&self) -> CacheResult<()>;

    /// Physically reclaim expired entries. Returns the number reclaimed.
    fn prune(&self) -> CacheResult<u64>;

    /// Get store statistics.
    fn stats(&self) -> CacheResult<StoreStats>;
}

/// Statistics about store usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently stored (including not-yet-pruned expired
    /// entries).
    pub entry_count: u64,
}

impl StoreStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
