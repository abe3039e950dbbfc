//! Configuration types for the cache layer.
//!
//! The recognized surface mirrors the nested key structure consumed by the
//! cache bootstrap: an adapter list with per-adapter connection parameters,
//! the selected adapter name, a default lifetime, a site identifier and an
//! enable flag.

use crate::error::{ConfigError, PlinthError, PlinthResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One memcached endpoint in the adapter list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemcachedServer {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Client options passed through verbatim to the backend store.
    #[serde(default)]
    pub options: serde_json::Value,
}

/// Memcached adapter parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemcachedSettings {
    pub servers: Vec<MemcachedServer>,
}

/// Filesystem adapter parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAdapterSettings {
    /// Directory the store is rooted at.
    pub path: String,
    /// Namespace within the store; empty means the default namespace.
    #[serde(default)]
    pub namespace: String,
}

/// Named backend adapters and their connection parameters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AdapterList {
    #[serde(default)]
    pub file: Option<FileAdapterSettings>,
    #[serde(default)]
    pub memcached: Option<MemcachedSettings>,
}

/// Master cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Whether the cache layer is enabled at all.
    pub enable: bool,
    /// Namespace discriminator for co-located caches sharing one backend.
    pub site_id: String,
    /// Default entry lifetime in seconds.
    pub lifetime_secs: u64,
    /// Name of the adapter to construct ("memory", "file", "memcached").
    pub adapter: String,
    /// Connection parameters per adapter.
    #[serde(default)]
    pub adapters: AdapterList,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enable: true,
            site_id: "default".to_string(),
            lifetime_secs: 3600,
            adapter: "memory".to_string(),
            adapters: AdapterList::default(),
        }
    }
}

impl CacheSettings {
    /// Parse settings from a JSON document.
    pub fn from_json_str(json: &str) -> PlinthResult<Self> {
        let settings: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::InvalidValue {
                field: "cache".to_string(),
                value: "<json>".to_string(),
                reason: e.to_string(),
            })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> PlinthResult<Self> {
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            PlinthError::Config(ConfigError::InvalidValue {
                field: "cache".to_string(),
                value: path.as_ref().display().to_string(),
                reason: e.to_string(),
            })
        })?;
        Self::from_json_str(&raw)
    }

    /// Apply environment overrides on top of these settings.
    ///
    /// Recognized variables:
    /// - `PLINTH_CACHE_ENABLE`: "true"/"false"
    /// - `PLINTH_CACHE_SITE_ID`
    /// - `PLINTH_CACHE_LIFETIME_SECS`
    /// - `PLINTH_CACHE_ADAPTER`
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(enable) = std::env::var("PLINTH_CACHE_ENABLE")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.enable = enable;
        }
        if let Ok(site_id) = std::env::var("PLINTH_CACHE_SITE_ID") {
            self.site_id = site_id;
        }
        if let Some(lifetime) = std::env::var("PLINTH_CACHE_LIFETIME_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.lifetime_secs = lifetime;
        }
        if let Ok(adapter) = std::env::var("PLINTH_CACHE_ADAPTER") {
            self.adapter = adapter;
        }
        self
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(PlinthError::Config) if invalid.
    pub fn validate(&self) -> PlinthResult<()> {
        if self.site_id.is_empty() {
            return Err(PlinthError::Config(ConfigError::MissingRequired {
                field: "site_id".to_string(),
            }));
        }

        if self.lifetime_secs == 0 {
            return Err(PlinthError::Config(ConfigError::InvalidValue {
                field: "lifetime_secs".to_string(),
                value: self.lifetime_secs.to_string(),
                reason: "lifetime_secs must be greater than 0".to_string(),
            }));
        }

        if self.adapter.is_empty() {
            return Err(PlinthError::Config(ConfigError::MissingRequired {
                field: "adapter".to_string(),
            }));
        }

        match self.adapter.as_str() {
            "memory" | "file" | "memcached" => {}
            other => {
                return Err(PlinthError::Config(ConfigError::AdapterNotSupported {
                    adapter: other.to_string(),
                }));
            }
        }

        if let Some(file) = &self.adapters.file {
            if file.path.is_empty() {
                return Err(PlinthError::Config(ConfigError::MissingRequired {
                    field: "adapters.file.path".to_string(),
                }));
            }
        }

        if let Some(memcached) = &self.adapters.memcached {
            if memcached.servers.is_empty() {
                return Err(PlinthError::Config(ConfigError::MissingRequired {
                    field: "adapters.memcached.servers".to_string(),
                }));
            }
            for (i, server) in memcached.servers.iter().enumerate() {
                if server.host.is_empty() {
                    return Err(PlinthError::Config(ConfigError::MissingRequired {
                        field: format!("adapters.memcached.servers[{}].host", i),
                    }));
                }
            }
        }

        Ok(())
    }
}
