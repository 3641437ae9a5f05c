//! Error types for the generational retrieval store.

use std::fmt;

/// Errors that can occur during store operations.
#[derive(Debug)]
pub enum StoreError {
    /// Input vector dimension did not match the configured dimension.
    DimensionMismatch { expected: usize, actual: usize },
    /// Hot tier is full even after an archive attempt.
    CapacityExceeded { max_size: usize },
    /// `doc_id` or `file_id` not present in the routing table.
    NotFound(String),
    /// An ANN backend returned an internal error, or was mid-swap past the brief lock.
    BackendUnavailable(String),
    /// The injected embedder failed.
    EmbedError(String),
    /// The injected reranker failed.
    RerankerError(String),
    /// The injected text generator failed.
    GenerationError(String),
    /// Routing or backend persistence failed; the in-memory mutation was rolled back.
    PersistError(String),
    /// The request exceeded its deadline.
    Timeout,
    /// A migration is already in progress for this tier.
    MigrationConflict { tier: String },
    /// A migration's Validating phase found the new backend's recall below
    /// the configured threshold; the old backend is left untouched.
    MigrationValidationFailed { tier: crate::persistence::Tier, reason: String },
    /// Invalid configuration.
    ConfigError(String),
    /// Other error (for extensibility).
    Other(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DimensionMismatch { expected, actual } => write!(
                f,
                "dimension mismatch: expected {expected}, got {actual}"
            ),
            Self::CapacityExceeded { max_size } => {
                write!(f, "hot index is full at max_size={max_size}")
            }
            Self::NotFound(id) => write!(f, "not found: {id}"),
            Self::BackendUnavailable(msg) => write!(f, "backend unavailable: {msg}"),
            Self::EmbedError(msg) => write!(f, "embedding failed: {msg}"),
            Self::RerankerError(msg) => write!(f, "reranker failed: {msg}"),
            Self::GenerationError(msg) => write!(f, "generation failed: {msg}"),
            Self::PersistError(msg) => write!(f, "persistence failed: {msg}"),
            Self::Timeout => write!(f, "request timed out"),
            Self::MigrationConflict { tier } => {
                write!(f, "migration already in progress for tier {tier}")
            }
            Self::MigrationValidationFailed { tier, reason } => {
                write!(f, "migration validation failed for tier {tier}: {reason}")
            }
            Self::ConfigError(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<crate::persistence::PersistenceError> for StoreError {
    fn from(e: crate::persistence::PersistenceError) -> Self {
        Self::PersistError(e.to_string())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
