//! Storage trait for checkpoint backends
//!
//! [`CheckpointStore`] is the seam between the engine/services and whatever
//! holds checkpoint rows. Stores are append-only: a checkpoint is written once
//! and never updated, so readers can never observe a half-written snapshot.
//!
//! Writers are serialized per `(thread_id, checkpoint_ns)` stream by an
//! expected-parent guard: [`CheckpointStore::save`] must reject a checkpoint
//! whose `parent_checkpoint_id` is not the stream's current latest checkpoint
//! with [`CheckpointError::Conflict`](crate::CheckpointError::Conflict). Two
//! callers that both computed "parent = latest" therefore cannot both append;
//! the loser re-reads and merges again.
//!
//! ```rust,ignore
//! use duragraph_checkpoint::{CheckpointStore, InMemoryCheckpointStore, HistoryQuery};
//!
//! let store = InMemoryCheckpointStore::new();
//! let latest = store.find_latest("thread-1", "").await?;
//! let history = store
//!     .find_history("thread-1", "", HistoryQuery::new().with_limit(10))
//!     .await?;
//! ```

use crate::checkpoint::{Checkpoint, CheckpointWrite};
use crate::error::Result;
use async_trait::async_trait;

/// Pagination for [`CheckpointStore::find_history`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Maximum number of checkpoints to return
    pub limit: Option<usize>,
    /// Only return checkpoints created before this checkpoint id
    pub before: Option<String>,
}

impl HistoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_before(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.before = Some(checkpoint_id.into());
        self
    }
}

/// Checkpoint persistence backend
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Append a checkpoint to its `(thread, namespace)` stream.
    ///
    /// Fails with `Conflict` when the checkpoint's parent is not the current
    /// latest checkpoint of the stream (a root is only accepted on an empty
    /// stream).
    async fn save(&self, checkpoint: Checkpoint) -> Result<()>;

    /// Look up a checkpoint by storage id
    async fn find_by_id(&self, id: &str) -> Result<Option<Checkpoint>>;

    /// Look up a checkpoint by its id within a stream
    async fn find_by_checkpoint_id(
        &self,
        thread_id: &str,
        checkpoint_ns: &str,
        checkpoint_id: &str,
    ) -> Result<Option<Checkpoint>>;

    /// Most recently created checkpoint of a stream
    async fn find_latest(&self, thread_id: &str, checkpoint_ns: &str)
        -> Result<Option<Checkpoint>>;

    /// Checkpoints of a stream, newest first
    async fn find_history(
        &self,
        thread_id: &str,
        checkpoint_ns: &str,
        query: HistoryQuery,
    ) -> Result<Vec<Checkpoint>>;

    /// Remove every checkpoint and write of a thread
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;

    /// Attach a pending write to an existing checkpoint
    async fn save_write(&self, write: CheckpointWrite) -> Result<()>;

    /// Pending writes of a checkpoint, ordered by `(task_id, idx)`
    async fn find_writes(
        &self,
        thread_id: &str,
        checkpoint_ns: &str,
        checkpoint_id: &str,
    ) -> Result<Vec<CheckpointWrite>>;
}
