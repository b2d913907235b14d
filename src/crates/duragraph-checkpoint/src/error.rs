//! Error types for checkpoint operations

use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur during checkpoint operations
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Checkpoint not found
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    /// Invalid checkpoint (missing thread id, malformed write, ...)
    #[error("Invalid checkpoint: {0}")]
    Invalid(String),

    /// Another writer appended to the same (thread, namespace) first
    #[error(
        "Checkpoint conflict on thread '{thread_id}': expected parent {}, latest is {}",
        expected.as_deref().unwrap_or("<root>"),
        actual.as_deref().unwrap_or("<none>")
    )]
    Conflict {
        thread_id: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),
}

impl CheckpointError {
    /// Whether retrying the read-merge-write cycle may succeed
    pub fn is_conflict(&self) -> bool {
        matches!(self, CheckpointError::Conflict { .. })
    }
}
