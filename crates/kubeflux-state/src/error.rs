//! Error types for the policy model and its persistence.

use thiserror::Error;

/// Result type alias for persistence operations.
pub type StateResult<T> = Result<T, StateError>;

/// Result type alias for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;

/// Errors raised by the redb-backed policy database.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}

/// Errors raised when reading or changing the policy.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid mode: {0}")]
    InvalidMode(String),

    #[error("invalid tier: {0}")]
    InvalidTier(String),

    #[error("invalid factor matrix: {0}")]
    InvalidMatrix(String),

    #[error("policy not persisted: {0}")]
    Persistence(#[from] StateError),
}
