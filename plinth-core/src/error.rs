//! Error types for Plinth operations

use thiserror::Error;

/// Property access mediation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Read access denied for field {field}")]
    DeniedRead { field: String },

    #[error("Write access denied for field {field}")]
    DeniedWrite { field: String },

    #[error("Unknown field: {field}")]
    UnknownField { field: String },

    #[error("Type mismatch for {field}: expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },
}

/// Hierarchical tree errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("Node already exists: {name}")]
    AlreadyExists { name: String },

    #[error("Node not found: {path}")]
    NotFound { path: String },

    #[error("Invalid node name: {reason}")]
    InvalidName { reason: String },

    #[error("Stale or foreign node handle")]
    InvalidHandle,

    #[error("Move would create a cycle: {name}")]
    CycleDetected { name: String },

    #[error("Integrity check failed: {reason}")]
    IntegrityFailure { reason: String },

    #[error("Malformed serialization envelope: {reason}")]
    MalformedEnvelope { reason: String },
}

/// Cache layer errors.
///
/// These surface from explicit store constructors only; `TaggedCache`
/// swallows them into its disabled no-op mode so the read/write path never
/// breaks because the cache is down.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend unavailable ({adapter}): {reason}")]
    BackendUnavailable { adapter: String, reason: String },

    #[error("Store operation failed: {reason}")]
    Store { reason: String },

    #[error("Key cannot be canonicalized")]
    UnusableKey,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Adapter not supported: {adapter}")]
    AdapterNotSupported { adapter: String },
}

/// Errors propagated opaquely from the external data engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("Statement failed ({statement}): {reason}")]
    Execution { statement: String, reason: String },
}

/// Master error type for all Plinth errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlinthError {
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Result type alias for Plinth operations.
pub type PlinthResult<T> = Result<T, PlinthError>;

// =============================================================================
// TESTS
// =============================================================================
