//! Tagged cache front-end.
//!
//! [`TaggedCache`] presents a uniform tagged get/set/invalidate API over
//! exactly one backend store, selected at construction from the configured
//! adapter list. Construction never fails: an adapter that cannot be built
//! falls back to the file adapter, and if that also fails the instance is
//! **disabled** - every operation becomes a documented no-op returning
//! `None`/`false` instead of raising. Callers never special-case "no cache
//! available".
//!
//! # Item handles
//!
//! `find` returns an owned [`CacheItem`] handle; staging (`set`, `tag`,
//! `expires_after`) happens on the handle and `save` persists it. The handle
//! is explicit rather than implicit instance state, so interleaved lookups
//! cannot clobber each other's staging.

use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use plinth_core::{CacheError, CacheSettings};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::lmdb_store::{LmdbStore, DEFAULT_MAP_SIZE_MB};
use crate::memory_store::MemoryStore;
use crate::store::TagStore;

/// Canonicalizes raw keys and tags, salted by the site identifier.
///
/// Plain strings pass through verbatim; structured values are hashed over
/// their canonical JSON encoding so that logically identical keys always
/// canonicalize identically. `Null` yields `None` - it signals a caller
/// error, not an empty key.
#[derive(Debug, Clone)]
pub struct SafeKeyer {
    site_id: String,
}

impl SafeKeyer {
    pub fn new(site_id: impl Into<String>) -> Self {
        Self {
            site_id: site_id.into(),
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    /// Canonicalize a raw key.
    pub fn safe_key(&self, raw: &Value) -> Option<String> {
        match raw {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            structured => {
                let mut hasher = Sha256::new();
                hasher.update(self.site_id.as_bytes());
                hasher.update(plinth_core::canonical_json(structured).as_bytes());
                Some(hex::encode(hasher.finalize()))
            }
        }
    }

    /// Canonicalize a raw tag (same transform as keys).
    pub fn safe_tag(&self, raw: &Value) -> Option<String> {
        self.safe_key(raw)
    }

    /// Canonicalize a collection of tags, short-circuiting to `None` if any
    /// element fails. Never partial success.
    pub fn safe_tags(&self, raws: &[Value]) -> Option<Vec<String>> {
        raws.iter().map(|raw| self.safe_tag(raw)).collect()
    }
}

/// An owned handle to one cache slot, returned by [`TaggedCache::find`].
#[derive(Debug, Clone)]
pub struct CacheItem {
    key: String,
    cached: Option<Value>,
    staged: Option<Value>,
    tags: Vec<String>,
    tags_ok: bool,
    expiry: Option<DateTime<Utc>>,
    keyer: SafeKeyer,
}

impl CacheItem {
    /// The canonical key this handle resolves to.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the backend had a live entry for this key at `find` time.
    pub fn is_hit(&self) -> bool {
        self.cached.is_some()
    }

    /// The cached value, if this was a hit.
    pub fn get(&self) -> Option<&Value> {
        self.cached.as_ref()
    }

    /// Stage a value to be persisted by `save`.
    pub fn set(mut self, value: Value) -> Self {
        self.staged = Some(value);
        self
    }

    /// Stage tags, canonicalizing each first. If any tag fails to
    /// canonicalize the whole item is poisoned and `save` will refuse it.
    pub fn tag(mut self, raw_tags: &[Value]) -> Self {
        match self.keyer.safe_tags(raw_tags) {
            Some(tags) => self.tags.extend(tags),
            None => self.tags_ok = false,
        }
        self
    }

    /// Stage a relative TTL override.
    pub fn expires_after(mut self, ttl: Duration) -> Self {
        self.expiry = Some(expiry_from_now(ttl));
        self
    }

    /// Stage an absolute expiry override.
    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expiry = Some(at);
        self
    }
}

fn expiry_from_now(ttl: Duration) -> DateTime<Utc> {
    let delta = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
    Utc::now()
        .checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

struct PendingSave {
    key: String,
    value: Value,
    tags: Vec<String>,
    expires_at: DateTime<Utc>,
}

/// Tagged cache over one pluggable backend store.
pub struct TaggedCache {
    store: Option<Box<dyn TagStore>>,
    keyer: SafeKeyer,
    default_ttl: Duration,
    deferred: RwLock<Vec<PendingSave>>,
    last_error: RwLock<Option<String>>,
}

impl TaggedCache {
    /// Build an enabled cache over an explicit store.
    ///
    /// This is the extension point for backend stores constructed outside
    /// the adapter list (e.g. a networked memcached-protocol client).
    pub fn new(
        store: Box<dyn TagStore>,
        site_id: impl Into<String>,
        default_ttl: Duration,
    ) -> Self {
        Self {
            store: Some(store),
            keyer: SafeKeyer::new(site_id),
            default_ttl,
            deferred: RwLock::new(Vec::new()),
            last_error: RwLock::new(None),
        }
    }

    /// Build a disabled cache: every operation is a no-op.
    pub fn disabled(site_id: impl Into<String>) -> Self {
        Self {
            store: None,
            keyer: SafeKeyer::new(site_id),
            default_ttl: Duration::from_secs(0),
            deferred: RwLock::new(Vec::new()),
            last_error: RwLock::new(None),
        }
    }

    /// Build a cache from configuration.
    ///
    /// The requested adapter is constructed first; on failure the file
    /// adapter is tried as a fallback; if that also fails (or the cache is
    /// disabled by configuration) the result is a disabled instance. This
    /// constructor never errors.
    pub fn from_settings(settings: &CacheSettings) -> Self {
        if !settings.enable {
            return Self::disabled(settings.site_id.clone());
        }
        let default_ttl = Duration::from_secs(settings.lifetime_secs);

        match build_adapter(&settings.adapter, settings) {
            Ok(store) => Self::new(store, settings.site_id.clone(), default_ttl),
            Err(primary) => {
                tracing::warn!(
                    adapter = %settings.adapter,
                    error = %primary,
                    "cache adapter construction failed, trying file fallback"
                );
                let fallback = if settings.adapter != "file" {
                    build_adapter("file", settings)
                } else {
                    Err(primary.clone())
                };
                match fallback {
                    Ok(store) => Self::new(store, settings.site_id.clone(), default_ttl),
                    Err(e) => {
                        tracing::warn!(error = %e, "cache fallback failed, running disabled");
                        let cache = Self::disabled(settings.site_id.clone());
                        cache.record_error(e.to_string());
                        cache
                    }
                }
            }
        }
    }

    /// Whether this instance has a usable backend.
    pub fn enabled(&self) -> bool {
        self.store.is_some()
    }

    /// The configured site identifier.
    pub fn site_id(&self) -> &str {
        self.keyer.site_id()
    }

    /// The last recorded error, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().ok().and_then(|e| e.clone())
    }

    fn record_error(&self, message: impl Into<String>) {
        if let Ok(mut slot) = self.last_error.write() {
            *slot = Some(message.into());
        }
    }

    /// Canonicalize a raw key. `None` when disabled or the key is unusable.
    pub fn safe_key(&self, raw: &Value) -> Option<String> {
        self.store.as_ref()?;
        self.keyer.safe_key(raw)
    }

    /// Canonicalize a raw tag.
    pub fn safe_tag(&self, raw: &Value) -> Option<String> {
        self.store.as_ref()?;
        self.keyer.safe_tag(raw)
    }

    /// Canonicalize a collection of tags; `None` if any element fails.
    pub fn safe_tags(&self, raws: &[Value]) -> Option<Vec<String>> {
        self.store.as_ref()?;
        self.keyer.safe_tags(raws)
    }

    /// Resolve a raw key to an item handle.
    ///
    /// `None` when disabled or when the key cannot be canonicalized.
    pub fn find(&self, raw_key: &Value) -> Option<CacheItem> {
        let store = self.store.as_ref()?;
        let key = match self.keyer.safe_key(raw_key) {
            Some(key) => key,
            None => {
                self.record_error(CacheError::UnusableKey.to_string());
                return None;
            }
        };
        let cached = match store.get(&key) {
            Ok(cached) => cached,
            Err(e) => {
                self.record_error(e.to_string());
                None
            }
        };
        Some(CacheItem {
            key,
            cached,
            staged: None,
            tags: Vec::new(),
            tags_ok: true,
            expiry: None,
            keyer: self.keyer.clone(),
        })
    }

    /// Convenience: find and report hit state in one call.
    pub fn is_hit(&self, raw_key: &Value) -> Option<bool> {
        self.find(raw_key).map(|item| item.is_hit())
    }

    /// Persist an item's staged value.
    ///
    /// The site-id tag is always added before the backend write, so every
    /// saved entry participates in site-wide bulk clear. With
    /// `deferred = true` the save is buffered until [`commit`].
    ///
    /// [`commit`]: TaggedCache::commit
    pub fn save(&self, item: CacheItem, deferred: bool) -> bool {
        let Some(store) = self.store.as_ref() else {
            return false;
        };
        if !item.tags_ok {
            self.record_error("tag canonicalization failed, item not saved");
            return false;
        }
        let value = match item.staged.or(item.cached) {
            Some(value) => value,
            None => {
                self.record_error("no value staged, item not saved");
                return false;
            }
        };

        let mut tags = item.tags;
        tags.push(self.keyer.site_id().to_string());
        let expires_at = item
            .expiry
            .unwrap_or_else(|| expiry_from_now(self.default_ttl));

        if deferred {
            if let Ok(mut pending) = self.deferred.write() {
                pending.push(PendingSave {
                    key: item.key,
                    value,
                    tags,
                    expires_at,
                });
                return true;
            }
            self.record_error("deferred buffer lock poisoned");
            return false;
        }

        match store.set(&item.key, value, &tags, Some(expires_at)) {
            Ok(()) => true,
            Err(e) => {
                self.record_error(e.to_string());
                false
            }
        }
    }

    /// Flush all deferred saves. Returns true only if every save succeeded.
    pub fn commit(&self) -> bool {
        let Some(store) = self.store.as_ref() else {
            return false;
        };
        let pending = match self.deferred.write() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(_) => {
                self.record_error("deferred buffer lock poisoned");
                return false;
            }
        };

        let mut all_ok = true;
        for save in pending {
            if let Err(e) = store.set(&save.key, save.value, &save.tags, Some(save.expires_at)) {
                self.record_error(e.to_string());
                all_ok = false;
            }
        }
        all_ok
    }

    /// Delete by raw key. `None` when disabled or the key is unusable.
    pub fn delete(&self, raw_key: &Value) -> Option<bool> {
        let store = self.store.as_ref()?;
        let key = match self.keyer.safe_key(raw_key) {
            Some(key) => key,
            None => {
                self.record_error(CacheError::UnusableKey.to_string());
                return None;
            }
        };
        match store.delete(&key) {
            Ok(existed) => Some(existed),
            Err(e) => {
                self.record_error(e.to_string());
                Some(false)
            }
        }
    }

    /// Delete by an item handle's key.
    pub fn delete_item(&self, item: &CacheItem) -> Option<bool> {
        let store = self.store.as_ref()?;
        match store.delete(item.key()) {
            Ok(existed) => Some(existed),
            Err(e) => {
                self.record_error(e.to_string());
                Some(false)
            }
        }
    }

    /// Bulk invalidate every entry carrying any of the given raw tags.
    pub fn delete_by_tags(&self, raw_tags: &[Value]) -> Option<u64> {
        let store = self.store.as_ref()?;
        let tags = match self.keyer.safe_tags(raw_tags) {
            Some(tags) => tags,
            None => {
                self.record_error(CacheError::UnusableKey.to_string());
                return None;
            }
        };
        match store.invalidate_tags(&tags) {
            Ok(removed) => Some(removed),
            Err(e) => {
                self.record_error(e.to_string());
                Some(0)
            }
        }
    }

    /// Clear this site's namespace, then optionally reclaim expired space.
    ///
    /// Every saved entry carries the site-id tag, so invalidating that one
    /// tag wipes exactly this site's cache without touching co-located
    /// caches sharing the backend.
    pub fn clear(&self, prune: bool) -> Option<()> {
        let store = self.store.as_ref()?;
        if let Err(e) = store.invalidate_tags(&[self.keyer.site_id().to_string()]) {
            self.record_error(e.to_string());
        }
        if prune {
            if let Err(e) = store.prune() {
                self.record_error(e.to_string());
            }
        }
        Some(())
    }
}

/// Construct a backend store by adapter name.
fn build_adapter(
    adapter: &str,
    settings: &CacheSettings,
) -> Result<Box<dyn TagStore>, CacheError> {
    match adapter {
        "memory" => Ok(Box::new(MemoryStore::new())),
        "file" => {
            let file = settings.adapters.file.as_ref().ok_or_else(|| {
                CacheError::BackendUnavailable {
                    adapter: "file".to_string(),
                    reason: "no file adapter configured".to_string(),
                }
            })?;
            let store = LmdbStore::open(&file.path, &file.namespace, DEFAULT_MAP_SIZE_MB)?;
            Ok(Box::new(store))
        }
        // The memcached-protocol client is an external collaborator; plug
        // one in through TaggedCache::new. Requesting it here exercises the
        // fallback chain.
        "memcached" => Err(CacheError::BackendUnavailable {
            adapter: "memcached".to_string(),
            reason: "no memcached client available".to_string(),
        }),
        other => Err(CacheError::BackendUnavailable {
            adapter: other.to_string(),
            reason: "unknown adapter".to_string(),
        }),
    }
}
