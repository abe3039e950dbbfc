//! Plinth Core - shared foundation types
//!
//! Pure data types and small helpers with no backend dependencies: the error
//! taxonomy, the cache configuration surface, canonical JSON encoding, and
//! the property-access mediation layer. All other Plinth crates depend on
//! this one.

pub mod access;
pub mod canon;
pub mod config;
pub mod error;

pub use access::{coerce, AccessPolicy, PropertyAccess};
pub use canon::canonical_json;
pub use config::{
    AdapterList, CacheSettings, FileAdapterSettings, MemcachedServer, MemcachedSettings,
};
pub use error::{
    CacheError, ConfigError, EngineError, PlinthError, PlinthResult, PolicyError, TreeError,
};
