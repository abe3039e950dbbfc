//! Query engine contract.
//!
//! [`CacheDb`](crate::CacheDb) sits in front of anything implementing
//! [`QueryEngine`]: the engine executes queries, the wrapper decides what to
//! cache and what to invalidate. Query shape is structural
//! ([`QuerySpec`]) rather than SQL text, so cache keys can be derived from a
//! canonical encoding instead of trusting the caller to order clauses
//! consistently.

use serde_json::{Map, Value};

use plinth_core::EngineError;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// A result row: column name to JSON value.
pub type Row = Map<String, Value>;

/// The shape of a read query.
///
/// Each part is a raw JSON value in the engine's own convention; the cache
/// layer never interprets them beyond canonical encoding. Join objects use
/// `[>]table` / `[<]table` / `[<>]table` / `[><]table` keys, optionally with
/// an ` (alias)` suffix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    pub columns: Value,
    pub filter: Value,
    pub join: Value,
}

impl QuerySpec {
    pub fn new(columns: Value, filter: Value) -> Self {
        Self {
            columns,
            filter,
            join: Value::Null,
        }
    }

    pub fn with_join(mut self, join: Value) -> Self {
        self.join = join;
        self
    }
}

/// Aggregate functions an engine must support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    Avg,
    Max,
    Min,
    Sum,
}

/// Kinds of read operation, used to partition the cache key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOp {
    Select,
    Get,
    Count,
    Aggregate(AggregateOp),
    Has,
}

impl ReadOp {
    /// Short tag naming the operation kind. Part of both the cache key and
    /// the entry's tag set, so distinct operations over the same table never
    /// collide and can be invalidated as a group.
    pub fn tag(&self) -> &'static str {
        match self {
            ReadOp::Select => "SQLSel",
            ReadOp::Get => "SQLGet",
            ReadOp::Count => "SQLCnt",
            ReadOp::Aggregate(AggregateOp::Avg) => "SQLAvg",
            ReadOp::Aggregate(AggregateOp::Max) => "SQLMax",
            ReadOp::Aggregate(AggregateOp::Min) => "SQLMin",
            ReadOp::Aggregate(AggregateOp::Sum) => "SQLSum",
            ReadOp::Has => "SQLHas",
        }
    }
}

/// Contract for the underlying data engine.
///
/// Read methods return engine-native results; write methods return the
/// affected-row count. `last_statement` and `last_error` expose the engine's
/// own diagnostics for logging by the cache layer.
pub trait QueryEngine {
    fn select(&mut self, table: &str, spec: &QuerySpec) -> EngineResult<Vec<Row>>;

    fn get_row(&mut self, table: &str, spec: &QuerySpec) -> EngineResult<Option<Row>>;

    fn count(&mut self, table: &str, spec: &QuerySpec) -> EngineResult<u64>;

    fn aggregate(&mut self, op: AggregateOp, table: &str, spec: &QuerySpec)
        -> EngineResult<Value>;

    fn has(&mut self, table: &str, spec: &QuerySpec) -> EngineResult<bool>;

    fn insert(&mut self, table: &str, rows: &[Row]) -> EngineResult<u64>;

    fn update(&mut self, table: &str, data: &Row, filter: &Value) -> EngineResult<u64>;

    fn delete_rows(&mut self, table: &str, filter: &Value) -> EngineResult<u64>;

    fn replace(&mut self, table: &str, columns: &Value, filter: &Value) -> EngineResult<u64>;

    fn create_table(&mut self, table: &str, schema: &Value) -> EngineResult<()>;

    fn drop_table(&mut self, table: &str) -> EngineResult<()>;

    /// The last statement the engine executed, for diagnostics.
    fn last_statement(&self) -> Option<String>;

    /// The last engine-level error, for diagnostics.
    fn last_error(&self) -> Option<String>;
}
