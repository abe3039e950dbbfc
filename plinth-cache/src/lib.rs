//! Plinth Cache - tagged caching and cache-aware data access.
//!
//! This crate provides the two halves of the caching layer:
//!
//! - [`TaggedCache`]: a uniform tagged get/set/invalidate API over exactly one
//!   of several interchangeable backend stores, selected at construction. A
//!   backend that cannot be built degrades through a fallback chain down to a
//!   disabled instance whose operations are documented no-ops, so callers
//!   never special-case "no cache available".
//! - [`CacheDb`]: a wrapper over an external [`QueryEngine`] that serves read
//!   queries from the cache by a deterministic per-query key and invalidates
//!   per-table tag groups on every mutating statement.
//!
//! # Tagging model
//!
//! Every saved entry carries a set of opaque tags; invalidation happens by
//! tag group rather than by individual key. The configured site id is always
//! added as a tag at save time, which makes "clear everything belonging to
//! this site" a single tag invalidation even when several sites share one
//! physical backend.

pub mod cached_db;
pub mod engine;
pub mod lmdb_store;
pub mod memory_store;
pub mod store;
pub mod tagged;

pub use cached_db::CacheDb;
pub use engine::{AggregateOp, EngineResult, QueryEngine, QuerySpec, ReadOp, Row};
pub use lmdb_store::LmdbStore;
pub use memory_store::MemoryStore;
pub use store::{CacheResult, StoreStats, TagStore};
pub use tagged::{CacheItem, SafeKeyer, TaggedCache};
