//! In-memory checkpoint storage for development and testing
//!
//! [`InMemoryCheckpointStore`] keeps every `(thread_id, checkpoint_ns)` stream
//! as an insertion-ordered `Vec` behind a single `tokio::sync::RwLock`:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  Arc<RwLock<Storage>>                        │
//! │   streams:                                   │
//! │    ("t-1", "")    ─► [cp-a, cp-b, cp-c]      │
//! │    ("t-1", "sub") ─► [cp-x]                  │
//! │   writes:                                    │
//! │    ("t-1", "", "cp-b") ─► [write, write]     │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The last element of a stream is its latest checkpoint. The expected-parent
//! check and the append happen under the same write lock, so concurrent
//! writers are linearized.
//!
//! Data is lost on restart; clones share the same storage.

use crate::{
    checkpoint::{Checkpoint, CheckpointWrite},
    error::{CheckpointError, Result},
    traits::{CheckpointStore, HistoryQuery},
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type StreamKey = (String, String);
type WriteKey = (String, String, String);

#[derive(Debug, Default)]
struct Storage {
    streams: HashMap<StreamKey, Vec<Checkpoint>>,
    writes: HashMap<WriteKey, Vec<CheckpointWrite>>,
}

/// In-memory checkpoint store
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    storage: Arc<RwLock<Storage>>,
}

fn stream_key(thread_id: &str, checkpoint_ns: &str) -> StreamKey {
    (thread_id.to_string(), checkpoint_ns.to_string())
}

impl InMemoryCheckpointStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct threads with at least one checkpoint
    pub async fn thread_count(&self) -> usize {
        let storage = self.storage.read().await;
        let mut threads: Vec<&String> = storage.streams.keys().map(|(t, _)| t).collect();
        threads.sort();
        threads.dedup();
        threads.len()
    }

    /// Total number of checkpoints across all streams
    pub async fn checkpoint_count(&self) -> usize {
        self.storage
            .read()
            .await
            .streams
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Clear all checkpoints and writes (useful for testing)
    pub async fn clear(&self) {
        let mut storage = self.storage.write().await;
        storage.streams.clear();
        storage.writes.clear();
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        if checkpoint.thread_id.is_empty() {
            return Err(CheckpointError::Invalid("thread_id is required".to_string()));
        }

        let mut storage = self.storage.write().await;
        let stream = storage
            .streams
            .entry(stream_key(&checkpoint.thread_id, &checkpoint.checkpoint_ns))
            .or_default();

        let latest = stream.last().map(|cp| cp.checkpoint_id.clone());
        if latest != checkpoint.parent_checkpoint_id {
            return Err(CheckpointError::Conflict {
                thread_id: checkpoint.thread_id.clone(),
                expected: checkpoint.parent_checkpoint_id.clone(),
                actual: latest,
            });
        }

        if stream
            .iter()
            .any(|cp| cp.checkpoint_id == checkpoint.checkpoint_id)
        {
            return Err(CheckpointError::Invalid(format!(
                "duplicate checkpoint_id: {}",
                checkpoint.checkpoint_id
            )));
        }

        tracing::debug!(
            thread_id = %checkpoint.thread_id,
            checkpoint_ns = %checkpoint.checkpoint_ns,
            checkpoint_id = %checkpoint.checkpoint_id,
            "checkpoint saved"
        );
        stream.push(checkpoint);
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Checkpoint>> {
        let storage = self.storage.read().await;
        Ok(storage
            .streams
            .values()
            .flat_map(|stream| stream.iter())
            .find(|cp| cp.id == id)
            .cloned())
    }

    async fn find_by_checkpoint_id(
        &self,
        thread_id: &str,
        checkpoint_ns: &str,
        checkpoint_id: &str,
    ) -> Result<Option<Checkpoint>> {
        let storage = self.storage.read().await;
        Ok(storage
            .streams
            .get(&stream_key(thread_id, checkpoint_ns))
            .and_then(|stream| stream.iter().find(|cp| cp.checkpoint_id == checkpoint_id))
            .cloned())
    }

    async fn find_latest(
        &self,
        thread_id: &str,
        checkpoint_ns: &str,
    ) -> Result<Option<Checkpoint>> {
        let storage = self.storage.read().await;
        Ok(storage
            .streams
            .get(&stream_key(thread_id, checkpoint_ns))
            .and_then(|stream| stream.last())
            .cloned())
    }

    async fn find_history(
        &self,
        thread_id: &str,
        checkpoint_ns: &str,
        query: HistoryQuery,
    ) -> Result<Vec<Checkpoint>> {
        let storage = self.storage.read().await;
        let Some(stream) = storage.streams.get(&stream_key(thread_id, checkpoint_ns)) else {
            return Ok(Vec::new());
        };

        let end = match &query.before {
            Some(before) => stream
                .iter()
                .position(|cp| &cp.checkpoint_id == before)
                .ok_or_else(|| CheckpointError::NotFound(before.clone()))?,
            None => stream.len(),
        };

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(stream[..end].iter().rev().take(limit).cloned().collect())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let mut storage = self.storage.write().await;
        storage.streams.retain(|(t, _), _| t != thread_id);
        storage.writes.retain(|(t, _, _), _| t != thread_id);
        Ok(())
    }

    async fn save_write(&self, write: CheckpointWrite) -> Result<()> {
        let mut storage = self.storage.write().await;

        let exists = storage
            .streams
            .get(&stream_key(&write.thread_id, &write.checkpoint_ns))
            .map(|stream| stream.iter().any(|cp| cp.checkpoint_id == write.checkpoint_id))
            .unwrap_or(false);
        if !exists {
            return Err(CheckpointError::NotFound(write.checkpoint_id));
        }

        let key = (
            write.thread_id.clone(),
            write.checkpoint_ns.clone(),
            write.checkpoint_id.clone(),
        );
        let writes = storage.writes.entry(key).or_default();
        writes.retain(|w| !(w.task_id == write.task_id && w.idx == write.idx));
        writes.push(write);
        writes.sort_by(|a, b| a.task_id.cmp(&b.task_id).then(a.idx.cmp(&b.idx)));
        Ok(())
    }

    async fn find_writes(
        &self,
        thread_id: &str,
        checkpoint_ns: &str,
        checkpoint_id: &str,
    ) -> Result<Vec<CheckpointWrite>> {
        let storage = self.storage.read().await;
        let key = (
            thread_id.to_string(),
            checkpoint_ns.to_string(),
            checkpoint_id.to_string(),
        );
        Ok(storage.writes.get(&key).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::ChannelValues;
    use serde_json::json;

    async fn chain(store: &InMemoryCheckpointStore, thread: &str, n: usize) -> Vec<Checkpoint> {
        let mut out: Vec<Checkpoint> = Vec::new();
        for i in 0..n {
            let mut delta = ChannelValues::new();
            delta.insert("step".to_string(), json!(i));
            let cp = match out.last() {
                Some(parent) => parent.child(delta).unwrap(),
                None => Checkpoint::root(thread, "", delta).unwrap(),
            };
            store.save(cp.clone()).await.unwrap();
            out.push(cp);
        }
        out
    }

    #[tokio::test]
    async fn test_save_and_find_latest() {
        let store = InMemoryCheckpointStore::new();
        let cps = chain(&store, "thread-1", 3).await;

        let latest = store.find_latest("thread-1", "").await.unwrap().unwrap();
        assert_eq!(latest.checkpoint_id, cps[2].checkpoint_id);
        assert_eq!(store.checkpoint_count().await, 3);

        let by_id = store.find_by_id(&cps[0].id).await.unwrap().unwrap();
        assert_eq!(by_id.checkpoint_id, cps[0].checkpoint_id);
    }

    #[tokio::test]
    async fn test_stale_parent_is_rejected() {
        let store = InMemoryCheckpointStore::new();
        let cps = chain(&store, "thread-1", 2).await;

        // Forked from cps[0] while cps[1] is already the latest
        let stale = cps[0].child(ChannelValues::new()).unwrap();
        let err = store.save(stale).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.checkpoint_count().await, 2);
    }

    #[tokio::test]
    async fn test_second_root_is_rejected() {
        let store = InMemoryCheckpointStore::new();
        chain(&store, "thread-1", 1).await;

        let root = Checkpoint::root("thread-1", "", ChannelValues::new()).unwrap();
        assert!(store.save(root).await.unwrap_err().is_conflict());

        // other namespace is a separate stream
        let root = Checkpoint::root("thread-1", "sub", ChannelValues::new()).unwrap();
        store.save(root).await.unwrap();
        assert_eq!(store.thread_count().await, 1);
    }

    #[tokio::test]
    async fn test_history_newest_first_with_cursor() {
        let store = InMemoryCheckpointStore::new();
        let cps = chain(&store, "thread-1", 5).await;

        let all = store
            .find_history("thread-1", "", HistoryQuery::new())
            .await
            .unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].checkpoint_id, cps[4].checkpoint_id);

        let page = store
            .find_history(
                "thread-1",
                "",
                HistoryQuery::new()
                    .with_before(cps[3].checkpoint_id.clone())
                    .with_limit(2),
            )
            .await
            .unwrap();
        let ids: Vec<_> = page.iter().map(|c| c.checkpoint_id.clone()).collect();
        assert_eq!(ids, vec![cps[2].checkpoint_id.clone(), cps[1].checkpoint_id.clone()]);

        let missing = store
            .find_history("thread-1", "", HistoryQuery::new().with_before("nope"))
            .await;
        assert!(matches!(missing, Err(CheckpointError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_history_of_unknown_thread_is_empty() {
        let store = InMemoryCheckpointStore::new();
        let history = store
            .find_history("ghost", "", HistoryQuery::new())
            .await
            .unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_writes_roundtrip_and_order() {
        let store = InMemoryCheckpointStore::new();
        let cps = chain(&store, "thread-1", 1).await;

        store
            .save_write(CheckpointWrite::new(&cps[0], "task-b", 0, "out", json!(2)))
            .await
            .unwrap();
        store
            .save_write(CheckpointWrite::new(&cps[0], "task-a", 1, "out", json!(1)))
            .await
            .unwrap();
        store
            .save_write(CheckpointWrite::new(&cps[0], "task-a", 0, "out", json!(0)))
            .await
            .unwrap();

        let writes = store
            .find_writes("thread-1", "", &cps[0].checkpoint_id)
            .await
            .unwrap();
        let order: Vec<_> = writes.iter().map(|w| (w.task_id.as_str(), w.idx)).collect();
        assert_eq!(order, vec![("task-a", 0), ("task-a", 1), ("task-b", 0)]);
    }

    #[tokio::test]
    async fn test_write_to_unknown_checkpoint_fails() {
        let store = InMemoryCheckpointStore::new();
        let orphan = Checkpoint::root("thread-1", "", ChannelValues::new()).unwrap();
        let err = store
            .save_write(CheckpointWrite::new(&orphan, "task", 0, "c", json!(null)))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_thread_and_clear() {
        let store = InMemoryCheckpointStore::new();
        chain(&store, "thread-1", 2).await;
        chain(&store, "thread-2", 1).await;

        store.delete_thread("thread-1").await.unwrap();
        assert_eq!(store.thread_count().await, 1);
        assert!(store.find_latest("thread-1", "").await.unwrap().is_none());

        store.clear().await;
        assert_eq!(store.checkpoint_count().await, 0);
    }
}
