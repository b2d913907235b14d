//! Error taxonomy for run execution
//!
//! Every fallible operation in the core returns [`DomainError`]. Variants are
//! grouped by how callers must react:
//!
//! ```text
//! DomainError
//! ├── InvalidInput            - rejected before any state change
//! ├── InvalidState            - operation illegal for the current status
//! ├── NotFound                - run/thread/assistant/checkpoint/graph missing
//! ├── AlreadyExists, Conflict - identity clash / lost optimistic race
//! ├── execution fatal         - abort the run (Run::fail)
//! │   ├── MaxIterations
//! │   ├── SubgraphDepthExceeded
//! │   ├── Configuration
//! │   ├── NodeExecution
//! │   └── Cancelled
//! ├── NoWorker, StaleWorker   - dispatch misses, recovered locally
//! ├── Timeout                 - bounded wait elapsed
//! ├── Checkpoint              - storage layer failure
//! └── Serialization
//! ```
//!
//! Domain and state-machine errors go back to the caller synchronously and are
//! never retried automatically. Execution-fatal errors move the run to
//! `failed` with `to_string()` as the run's error text.
//!
//! ```rust
//! use duragraph_core::error::DomainError;
//!
//! let err = DomainError::invalid_state("completed", "cancel");
//! assert_eq!(err.code(), "INVALID_STATE");
//! assert!(!err.is_execution_fatal());
//! ```

use duragraph_checkpoint::CheckpointError;
use thiserror::Error;

/// Convenience result type using [`DomainError`]
pub type Result<T> = std::result::Result<T, DomainError>;

/// Errors raised by the run-execution core
#[derive(Error, Debug)]
pub enum DomainError {
    /// Missing or malformed request data
    #[error("invalid input for field {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    /// Operation not legal for the current status
    #[error("cannot perform {operation} in state {current}")]
    InvalidState { current: String, operation: String },

    /// Referenced resource does not exist
    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    /// Resource with the same identity already exists
    #[error("{resource} already exists: {id}")]
    AlreadyExists { resource: String, id: String },

    /// Concurrent modification or multitask rejection
    #[error("conflict: {0}")]
    Conflict(String),

    /// Per-node visit ceiling exceeded
    #[error("max iterations ({limit}) exceeded at node '{node}'")]
    MaxIterations { node: String, limit: u32 },

    /// Subgraph nesting too deep
    #[error("subgraph depth {depth} exceeds maximum {max}")]
    SubgraphDepthExceeded { depth: u32, max: u32 },

    /// Node or graph misconfigured
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A node executor failed
    #[error("node '{node}' execution failed: {error}")]
    NodeExecution { node: String, error: String },

    /// Execution cancelled between nodes
    #[error("execution cancelled: {0}")]
    Cancelled(String),

    /// No healthy worker advertises the graph
    #[error("no healthy worker available for graph {0}")]
    NoWorker(String),

    /// Worker heartbeat is older than the health threshold
    #[error("worker {0} heartbeat is stale")]
    StaleWorker(String),

    /// Bounded wait elapsed
    #[error("operation timed out after {duration_ms}ms: {operation}")]
    Timeout { operation: String, duration_ms: u64 },

    /// Checkpoint storage failure
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// JSON (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML graph definition could not be parsed
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl DomainError {
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_state(current: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::InvalidState {
            current: current.into(),
            operation: operation.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn already_exists(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::InvalidInput { .. } => "INVALID_INPUT",
            DomainError::InvalidState { .. } => "INVALID_STATE",
            DomainError::NotFound { .. } => "NOT_FOUND",
            DomainError::AlreadyExists { .. } => "ALREADY_EXISTS",
            DomainError::Conflict(_) => "CONFLICT",
            DomainError::MaxIterations { .. } => "MAX_ITERATIONS",
            DomainError::SubgraphDepthExceeded { .. } => "SUBGRAPH_DEPTH_EXCEEDED",
            DomainError::Configuration(_) => "CONFIGURATION_ERROR",
            DomainError::NodeExecution { .. } => "NODE_EXECUTION_FAILED",
            DomainError::Cancelled(_) => "CANCELLED",
            DomainError::NoWorker(_) => "NO_WORKER",
            DomainError::StaleWorker(_) => "STALE_WORKER",
            DomainError::Timeout { .. } => "TIMEOUT",
            DomainError::Checkpoint(CheckpointError::NotFound(_)) => "NOT_FOUND",
            DomainError::Checkpoint(CheckpointError::Conflict { .. }) => "CONFLICT",
            DomainError::Checkpoint(_) => "CHECKPOINT_ERROR",
            DomainError::Serialization(_) | DomainError::Yaml(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Errors that abort a run rather than being returned to a client request
    pub fn is_execution_fatal(&self) -> bool {
        matches!(
            self,
            DomainError::MaxIterations { .. }
                | DomainError::SubgraphDepthExceeded { .. }
                | DomainError::Configuration(_)
                | DomainError::NodeExecution { .. }
                | DomainError::Cancelled(_)
        )
    }

    /// Dispatch misses that fall back to local execution
    pub fn is_worker_miss(&self) -> bool {
        matches!(self, DomainError::NoWorker(_) | DomainError::StaleWorker(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            DomainError::Conflict(_) | DomainError::Checkpoint(CheckpointError::Conflict { .. })
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DomainError::NotFound { .. } | DomainError::Checkpoint(CheckpointError::NotFound(_))
        )
    }
}
