//! Error types for the checkpoint store.

use thiserror::Error;

/// Result type alias for checkpoint store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur while persisting or restoring campaign state.
///
/// These are never fatal to a running campaign: the scheduler logs them,
/// keeps its in-memory state, and retries the checkpoint on the next tick.
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
