//! Cache-aware data access.
//!
//! [`CacheDb`] wraps a [`QueryEngine`] and serves read queries from the
//! tagged cache. Each read gets a deterministic key derived from the
//! operation kind, the table, and the canonical encoding of the query shape;
//! each cached entry is tagged with its operation kind and with
//! `SQLTbl-<table>` for the primary table and every joined table. Mutations
//! invalidate the per-table tag group, so one write wipes every cached read
//! that touched the table - coarse, but correct without tracking which rows
//! each query saw.
//!
//! Cache failures never fail reads: a save that does not stick just means
//! the next identical query runs against the engine again.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use plinth_core::canonical_json;

use crate::engine::{AggregateOp, EngineResult, QueryEngine, QuerySpec, ReadOp, Row};
use crate::tagged::TaggedCache;

/// Matches a join key in the `[>]table`, `[<]table`, `[<>]table`, `[><]table`
/// convention, with an optional ` (alias)` suffix after the table name.
static JOIN_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[\s*(?:<>|><|<|>)\s*\]\s*([A-Za-z0-9_]+)").unwrap());

/// Build the cache key for a read query.
///
/// Pure and deterministic: the same logical query always produces the same
/// key, regardless of how the caller ordered filter clauses, because the
/// query shape goes through canonical JSON encoding before URL-encoding.
pub fn build_key(op: ReadOp, table: &str, spec: &QuerySpec) -> String {
    let raw = format!(
        "{}|{}|{}|{}|{}",
        op.tag(),
        table,
        canonical_json(&spec.columns),
        canonical_json(&spec.filter),
        canonical_json(&spec.join),
    );
    urlencoding::encode(&raw).into_owned()
}

fn table_tag(table: &str) -> String {
    format!("SQLTbl-{table}")
}

/// The tag set for a read: its op-kind tag plus one table tag per table the
/// query touches (primary and joined).
fn read_tags(op: ReadOp, table: &str, join: &Value) -> Vec<String> {
    let mut tags = vec![op.tag().to_string(), table_tag(table)];
    if let Value::Object(joins) = join {
        for key in joins.keys() {
            if let Some(captures) = JOIN_TABLE.captures(key) {
                tags.push(table_tag(&captures[1]));
            }
        }
    }
    tags
}

/// A query engine wrapped with tagged read caching and write invalidation.
pub struct CacheDb<E> {
    engine: E,
    cache: TaggedCache,
    ttl: Option<Duration>,
    auto_clear: bool,
}

impl<E: QueryEngine> CacheDb<E> {
    pub fn new(engine: E, cache: TaggedCache) -> Self {
        Self {
            engine,
            cache,
            ttl: None,
            auto_clear: true,
        }
    }

    /// Override the cache's default TTL for entries saved by this wrapper.
    pub fn ttl_override(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Toggle write-triggered invalidation. With it off, mutations leave
    /// stale reads in the cache until their TTL expires - only for callers
    /// that invalidate by hand.
    pub fn set_auto_clear(&mut self, auto_clear: bool) {
        self.auto_clear = auto_clear;
    }

    pub fn cache(&self) -> &TaggedCache {
        &self.cache
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn last_statement(&self) -> Option<String> {
        self.engine.last_statement()
    }

    pub fn last_error(&self) -> Option<String> {
        self.engine.last_error()
    }

    // ========================================================================
    // Read path
    // ========================================================================

    fn read_through<T, F>(
        &mut self,
        op: ReadOp,
        table: &str,
        spec: &QuerySpec,
        fetch: F,
    ) -> EngineResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut E) -> EngineResult<T>,
    {
        let key = build_key(op, table, spec);
        let item = self.cache.find(&Value::String(key.clone()));

        if let Some(item) = &item {
            if let Some(cached) = item.get() {
                if let Ok(value) = serde_json::from_value::<T>(cached.clone()) {
                    tracing::debug!(%key, table, op = op.tag(), "cache hit");
                    return Ok(value);
                }
                // shape drift between versions: fall through to the engine
            }
        }

        let value = fetch(&mut self.engine)?;

        if let Some(item) = item {
            match serde_json::to_value(&value) {
                Ok(json) => {
                    let raw_tags: Vec<Value> = read_tags(op, table, &spec.join)
                        .into_iter()
                        .map(Value::String)
                        .collect();
                    let mut item = item.set(json).tag(&raw_tags);
                    if let Some(ttl) = self.ttl {
                        item = item.expires_after(ttl);
                    }
                    if self.cache.save(item, false) {
                        tracing::debug!(%key, table, "cached read result");
                    } else {
                        tracing::warn!(%key, table, "cache save failed");
                    }
                }
                Err(e) => tracing::warn!(%key, error = %e, "read result not cacheable"),
            }
        }
        Ok(value)
    }

    pub fn select(&mut self, table: &str, spec: &QuerySpec) -> EngineResult<Vec<Row>> {
        self.read_through(ReadOp::Select, table, spec, |engine| {
            engine.select(table, spec)
        })
    }

    pub fn get(&mut self, table: &str, spec: &QuerySpec) -> EngineResult<Option<Row>> {
        self.read_through(ReadOp::Get, table, spec, |engine| {
            engine.get_row(table, spec)
        })
    }

    pub fn count(&mut self, table: &str, spec: &QuerySpec) -> EngineResult<u64> {
        self.read_through(ReadOp::Count, table, spec, |engine| {
            engine.count(table, spec)
        })
    }

    pub fn aggregate(
        &mut self,
        op: AggregateOp,
        table: &str,
        spec: &QuerySpec,
    ) -> EngineResult<Value> {
        self.read_through(ReadOp::Aggregate(op), table, spec, |engine| {
            engine.aggregate(op, table, spec)
        })
    }

    pub fn avg(&mut self, table: &str, spec: &QuerySpec) -> EngineResult<Value> {
        self.aggregate(AggregateOp::Avg, table, spec)
    }

    pub fn max(&mut self, table: &str, spec: &QuerySpec) -> EngineResult<Value> {
        self.aggregate(AggregateOp::Max, table, spec)
    }

    pub fn min(&mut self, table: &str, spec: &QuerySpec) -> EngineResult<Value> {
        self.aggregate(AggregateOp::Min, table, spec)
    }

    pub fn sum(&mut self, table: &str, spec: &QuerySpec) -> EngineResult<Value> {
        self.aggregate(AggregateOp::Sum, table, spec)
    }

    pub fn has(&mut self, table: &str, spec: &QuerySpec) -> EngineResult<bool> {
        self.read_through(ReadOp::Has, table, spec, |engine| engine.has(table, spec))
    }

    // ========================================================================
    // Write path
    // ========================================================================

    fn after_write(&mut self, table: &str, affected: u64, always: bool) {
        match self.engine.last_statement() {
            Some(statement) => {
                tracing::debug!(table, affected, %statement, "write executed")
            }
            None => tracing::debug!(table, affected, "write executed"),
        }
        if self.auto_clear && (always || affected > 0) {
            let removed = self
                .cache
                .delete_by_tags(&[Value::String(table_tag(table))])
                .unwrap_or(0);
            tracing::debug!(table, removed, "invalidated table tag group");
        }
    }

    pub fn insert(&mut self, table: &str, rows: &[Row]) -> EngineResult<u64> {
        let affected = self.engine.insert(table, rows)?;
        self.after_write(table, affected, false);
        Ok(affected)
    }

    pub fn update(&mut self, table: &str, data: &Row, filter: &Value) -> EngineResult<u64> {
        let affected = self.engine.update(table, data, filter)?;
        self.after_write(table, affected, false);
        Ok(affected)
    }

    pub fn delete_rows(&mut self, table: &str, filter: &Value) -> EngineResult<u64> {
        let affected = self.engine.delete_rows(table, filter)?;
        self.after_write(table, affected, false);
        Ok(affected)
    }

    pub fn replace(&mut self, table: &str, columns: &Value, filter: &Value) -> EngineResult<u64> {
        let affected = self.engine.replace(table, columns, filter)?;
        self.after_write(table, affected, false);
        Ok(affected)
    }

    pub fn create_table(&mut self, table: &str, schema: &Value) -> EngineResult<()> {
        self.engine.create_table(table, schema)
    }

    /// Drop a table. Invalidation is unconditional: there is no affected
    /// count to gate on, and anything cached for the table is now wrong.
    pub fn drop_table(&mut self, table: &str) -> EngineResult<()> {
        self.engine.drop_table(table)?;
        self.after_write(table, 0, true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use plinth_core::EngineError;
    use serde_json::json;

    // ========================================================================
    // Mock engine
    // ========================================================================

    #[derive(Default)]
    struct MockEngine {
        rows: Vec<Row>,
        read_calls: u32,
        write_affected: u64,
        statement: Option<String>,
    }

    impl MockEngine {
        fn with_rows(rows: Vec<Row>) -> Self {
            Self {
                rows,
                write_affected: 1,
                ..Default::default()
            }
        }

        fn row(pairs: &[(&str, Value)]) -> Row {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect()
        }

        fn note(&mut self, statement: String) {
            self.statement = Some(statement);
        }
    }

    impl QueryEngine for MockEngine {
        fn select(&mut self, table: &str, _spec: &QuerySpec) -> EngineResult<Vec<Row>> {
            self.read_calls += 1;
            self.note(format!("SELECT * FROM {table}"));
            Ok(self.rows.clone())
        }

        fn get_row(&mut self, table: &str, _spec: &QuerySpec) -> EngineResult<Option<Row>> {
            self.read_calls += 1;
            self.note(format!("SELECT * FROM {table} LIMIT 1"));
            Ok(self.rows.first().cloned())
        }

        fn count(&mut self, table: &str, _spec: &QuerySpec) -> EngineResult<u64> {
            self.read_calls += 1;
            self.note(format!("SELECT COUNT(*) FROM {table}"));
            Ok(self.rows.len() as u64)
        }

        fn aggregate(
            &mut self,
            _op: AggregateOp,
            table: &str,
            _spec: &QuerySpec,
        ) -> EngineResult<Value> {
            self.read_calls += 1;
            self.note(format!("SELECT AGG FROM {table}"));
            Ok(json!(42))
        }

        fn has(&mut self, table: &str, _spec: &QuerySpec) -> EngineResult<bool> {
            self.read_calls += 1;
            self.note(format!("SELECT EXISTS FROM {table}"));
            Ok(!self.rows.is_empty())
        }

        fn insert(&mut self, table: &str, rows: &[Row]) -> EngineResult<u64> {
            self.note(format!("INSERT INTO {table}"));
            Ok(rows.len() as u64)
        }

        fn update(&mut self, table: &str, _data: &Row, _filter: &Value) -> EngineResult<u64> {
            self.note(format!("UPDATE {table}"));
            Ok(self.write_affected)
        }

        fn delete_rows(&mut self, table: &str, _filter: &Value) -> EngineResult<u64> {
            self.note(format!("DELETE FROM {table}"));
            Ok(self.write_affected)
        }

        fn replace(&mut self, table: &str, _columns: &Value, _filter: &Value) -> EngineResult<u64> {
            self.note(format!("REPLACE {table}"));
            Ok(self.write_affected)
        }

        fn create_table(&mut self, table: &str, _schema: &Value) -> EngineResult<()> {
            self.note(format!("CREATE TABLE {table}"));
            Ok(())
        }

        fn drop_table(&mut self, table: &str) -> EngineResult<()> {
            self.note(format!("DROP TABLE {table}"));
            Ok(())
        }

        fn last_statement(&self) -> Option<String> {
            self.statement.clone()
        }

        fn last_error(&self) -> Option<String> {
            None
        }
    }

    fn cache_db(rows: Vec<Row>) -> CacheDb<MockEngine> {
        let cache = TaggedCache::new(
            Box::new(MemoryStore::new()),
            "test-site",
            Duration::from_secs(600),
        );
        CacheDb::new(MockEngine::with_rows(rows), cache)
    }

    fn users_row() -> Row {
        MockEngine::row(&[("id", json!(1)), ("name", json!("amy"))])
    }

    // ========================================================================
    // Key derivation
    // ========================================================================

    #[test]
    fn test_build_key_deterministic_across_clause_order() {
        let first = QuerySpec::new(json!(["id", "name"]), json!({"a": 1, "b": 2}));
        let second = QuerySpec::new(json!(["id", "name"]), json!({"b": 2, "a": 1}));
        assert_eq!(
            build_key(ReadOp::Select, "users", &first),
            build_key(ReadOp::Select, "users", &second)
        );
    }

    #[test]
    fn test_build_key_distinguishes_op_table_and_shape() {
        let spec = QuerySpec::new(json!(["id"]), json!({"a": 1}));
        let base = build_key(ReadOp::Select, "users", &spec);
        assert_ne!(base, build_key(ReadOp::Count, "users", &spec));
        assert_ne!(base, build_key(ReadOp::Select, "posts", &spec));
        assert_ne!(
            base,
            build_key(ReadOp::Select, "users", &QuerySpec::new(json!(["id"]), json!({"a": 2})))
        );
    }

    #[test]
    fn test_build_key_is_url_safe() {
        let spec = QuerySpec::new(json!(["name"]), json!({"q": "a b&c/d"}));
        let key = build_key(ReadOp::Select, "users", &spec);
        assert!(!key.contains('|'));
        assert!(!key.contains(' '));
        assert!(!key.contains('&'));
    }

    #[test]
    fn test_read_tags_include_joined_tables() {
        let join = json!({
            "[>]posts": {"users.id": "posts.user_id"},
            "[<>] comments (c)": {"posts.id": "c.post_id"},
            "not_a_join": {}
        });
        let tags = read_tags(ReadOp::Select, "users", &join);
        assert!(tags.contains(&"SQLSel".to_string()));
        assert!(tags.contains(&"SQLTbl-users".to_string()));
        assert!(tags.contains(&"SQLTbl-posts".to_string()));
        assert!(tags.contains(&"SQLTbl-comments".to_string()));
        assert_eq!(tags.len(), 4);
    }

    // ========================================================================
    // Read-through
    // ========================================================================

    #[test]
    fn test_select_hits_cache_on_second_call() {
        let mut db = cache_db(vec![users_row()]);
        let spec = QuerySpec::new(json!(["id", "name"]), json!({"id": 1}));

        let first = db.select("users", &spec).unwrap();
        let second = db.select("users", &spec).unwrap();
        assert_eq!(first, second);
        assert_eq!(db.engine().read_calls, 1);
    }

    #[test]
    fn test_scalar_reads_cache() {
        let mut db = cache_db(vec![users_row(), users_row()]);
        let spec = QuerySpec::default();

        assert_eq!(db.count("users", &spec).unwrap(), 2);
        assert_eq!(db.count("users", &spec).unwrap(), 2);
        assert!(db.has("users", &spec).unwrap());
        assert!(db.has("users", &spec).unwrap());
        assert_eq!(db.avg("users", &spec).unwrap(), json!(42));
        assert_eq!(db.sum("users", &spec).unwrap(), json!(42));
        // one engine call per distinct operation kind
        assert_eq!(db.engine().read_calls, 4);
    }

    #[test]
    fn test_get_caches_none_results() {
        let mut db = cache_db(vec![]);
        let spec = QuerySpec::new(json!("*"), json!({"id": 999}));

        assert_eq!(db.get("users", &spec).unwrap(), None);
        assert_eq!(db.get("users", &spec).unwrap(), None);
        assert_eq!(db.engine().read_calls, 1);
    }

    // ========================================================================
    // Write invalidation
    // ========================================================================

    #[test]
    fn test_mutation_invalidates_cached_reads() {
        let mut db = cache_db(vec![users_row()]);
        let spec = QuerySpec::new(json!("*"), json!({}));

        db.select("users", &spec).unwrap();
        assert_eq!(db.engine().read_calls, 1);

        assert_eq!(db.insert("users", &[users_row()]).unwrap(), 1);

        db.select("users", &spec).unwrap();
        assert_eq!(db.engine().read_calls, 2);
    }

    #[test]
    fn test_zero_affected_mutation_keeps_cache() {
        let mut db = cache_db(vec![users_row()]);
        db.engine.write_affected = 0;
        let spec = QuerySpec::default();

        db.select("users", &spec).unwrap();
        assert_eq!(db.update("users", &users_row(), &json!({"id": 999})).unwrap(), 0);

        db.select("users", &spec).unwrap();
        assert_eq!(db.engine().read_calls, 1);
    }

    #[test]
    fn test_drop_table_invalidates_unconditionally() {
        let mut db = cache_db(vec![users_row()]);
        let spec = QuerySpec::default();

        db.select("users", &spec).unwrap();
        db.drop_table("users").unwrap();

        db.select("users", &spec).unwrap();
        assert_eq!(db.engine().read_calls, 2);
    }

    #[test]
    fn test_mutation_on_other_table_keeps_cache() {
        let mut db = cache_db(vec![users_row()]);
        let spec = QuerySpec::default();

        db.select("users", &spec).unwrap();
        assert_eq!(db.delete_rows("posts", &json!({})).unwrap(), 1);

        db.select("users", &spec).unwrap();
        assert_eq!(db.engine().read_calls, 1);
    }

    #[test]
    fn test_joined_read_invalidated_by_either_table() {
        let mut db = cache_db(vec![users_row()]);
        let spec = QuerySpec::new(json!("*"), json!({}))
            .with_join(json!({"[>]posts": {"users.id": "posts.user_id"}}));

        db.select("users", &spec).unwrap();
        // write to the joined table, not the primary one
        assert_eq!(db.update("posts", &users_row(), &json!({})).unwrap(), 1);

        db.select("users", &spec).unwrap();
        assert_eq!(db.engine().read_calls, 2);
    }

    #[test]
    fn test_auto_clear_off_leaves_cache_stale() {
        let mut db = cache_db(vec![users_row()]);
        db.set_auto_clear(false);
        let spec = QuerySpec::default();

        db.select("users", &spec).unwrap();
        assert_eq!(db.insert("users", &[users_row()]).unwrap(), 1);

        db.select("users", &spec).unwrap();
        assert_eq!(db.engine().read_calls, 1);
    }

    // ========================================================================
    // Degradation and diagnostics
    // ========================================================================

    #[test]
    fn test_disabled_cache_always_delegates() {
        let mut db = CacheDb::new(
            MockEngine::with_rows(vec![users_row()]),
            TaggedCache::disabled("test-site"),
        );
        let spec = QuerySpec::default();

        db.select("users", &spec).unwrap();
        db.select("users", &spec).unwrap();
        assert_eq!(db.engine().read_calls, 2);
    }

    #[test]
    fn test_engine_error_propagates() {
        struct FailingEngine;
        impl QueryEngine for FailingEngine {
            fn select(&mut self, _: &str, _: &QuerySpec) -> EngineResult<Vec<Row>> {
                Err(EngineError::Execution {
                    statement: "SELECT * FROM users".to_string(),
                    reason: "connection lost".to_string(),
                })
            }
            fn get_row(&mut self, _: &str, _: &QuerySpec) -> EngineResult<Option<Row>> {
                unimplemented!()
            }
            fn count(&mut self, _: &str, _: &QuerySpec) -> EngineResult<u64> {
                unimplemented!()
            }
            fn aggregate(&mut self, _: AggregateOp, _: &str, _: &QuerySpec) -> EngineResult<Value> {
                unimplemented!()
            }
            fn has(&mut self, _: &str, _: &QuerySpec) -> EngineResult<bool> {
                unimplemented!()
            }
            fn insert(&mut self, _: &str, _: &[Row]) -> EngineResult<u64> {
                unimplemented!()
            }
            fn update(&mut self, _: &str, _: &Row, _: &Value) -> EngineResult<u64> {
                unimplemented!()
            }
            fn delete_rows(&mut self, _: &str, _: &Value) -> EngineResult<u64> {
                unimplemented!()
            }
            fn replace(&mut self, _: &str, _: &Value, _: &Value) -> EngineResult<u64> {
                unimplemented!()
            }
            fn create_table(&mut self, _: &str, _: &Value) -> EngineResult<()> {
                unimplemented!()
            }
            fn drop_table(&mut self, _: &str) -> EngineResult<()> {
                unimplemented!()
            }
            fn last_statement(&self) -> Option<String> {
                None
            }
            fn last_error(&self) -> Option<String> {
                Some("connection lost".to_string())
            }
        }

        let mut db = CacheDb::new(FailingEngine, TaggedCache::disabled("test-site"));
        let err = db.select("users", &QuerySpec::default()).unwrap_err();
        assert!(err.to_string().contains("connection lost"));
        assert_eq!(db.last_error().as_deref(), Some("connection lost"));
    }

    #[test]
    fn test_last_statement_reflects_writes() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let mut db = cache_db(vec![users_row()]);
        db.insert("users", &[users_row()]).unwrap();
        assert_eq!(db.last_statement().as_deref(), Some("INSERT INTO users"));

        db.drop_table("users").unwrap();
        assert_eq!(db.last_statement().as_deref(), Some("DROP TABLE users"));
    }

    #[test]
    fn test_ttl_override_still_caches() {
        let mut db = cache_db(vec![users_row()]).ttl_override(Duration::from_secs(5));
        let spec = QuerySpec::default();

        db.select("users", &spec).unwrap();
        db.select("users", &spec).unwrap();
        assert_eq!(db.engine().read_calls, 1);
    }
}
