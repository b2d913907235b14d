//! Thread-state operations built on top of a [`CheckpointStore`]
//!
//! Every state change produces a new checkpoint; nothing here mutates a stored
//! row. The read-merge-write cycle retries when another writer appended to the
//! same stream in between (the store reports that as `Conflict`).

use crate::checkpoint::{
    ChannelValues, Checkpoint, METADATA_CHANNEL, NEXT_CHANNEL, TASKS_CHANNEL,
};
use crate::error::{CheckpointError, Result};
use crate::traits::CheckpointStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Attempts made by a read-merge-write cycle before giving up on conflicts
pub const MAX_WRITE_ATTEMPTS: usize = 5;

/// Client-facing view of a thread's state at one checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadState {
    pub values: ChannelValues,
    pub next: Vec<String>,
    pub tasks: Vec<Value>,
    pub metadata: ChannelValues,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_ns: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_checkpoint_id: Option<String>,
}

impl ThreadState {
    /// State of a thread that has no checkpoint yet
    pub fn empty() -> Self {
        Self {
            values: ChannelValues::new(),
            next: Vec::new(),
            tasks: Vec::new(),
            metadata: ChannelValues::new(),
            created_at: Utc::now(),
            checkpoint_id: None,
            checkpoint_ns: None,
            parent_checkpoint_id: None,
        }
    }
}

impl From<&Checkpoint> for ThreadState {
    fn from(cp: &Checkpoint) -> Self {
        Self {
            values: cp.user_values(),
            next: cp.next_nodes(),
            tasks: cp.tasks(),
            metadata: cp.metadata(),
            created_at: cp.created_at,
            checkpoint_id: Some(cp.checkpoint_id.clone()),
            checkpoint_ns: Some(cp.checkpoint_ns.clone()),
            parent_checkpoint_id: cp.parent_checkpoint_id.clone(),
        }
    }
}

/// Current state of a thread, empty when it has no checkpoint
pub async fn get_thread_state(
    store: &dyn CheckpointStore,
    thread_id: &str,
    checkpoint_ns: &str,
) -> Result<ThreadState> {
    Ok(store
        .find_latest(thread_id, checkpoint_ns)
        .await?
        .as_ref()
        .map(ThreadState::from)
        .unwrap_or_else(ThreadState::empty))
}

/// State of a thread at a specific checkpoint
pub async fn get_thread_state_at(
    store: &dyn CheckpointStore,
    thread_id: &str,
    checkpoint_ns: &str,
    checkpoint_id: &str,
) -> Result<ThreadState> {
    store
        .find_by_checkpoint_id(thread_id, checkpoint_ns, checkpoint_id)
        .await?
        .as_ref()
        .map(ThreadState::from)
        .ok_or_else(|| CheckpointError::NotFound(checkpoint_id.to_string()))
}

/// Merge `values` over the latest checkpoint of `(thread_id, checkpoint_ns)`
/// and append the result. Caller values win; unspecified keys persist. The new
/// checkpoint's parent is the previous latest (a root when there is none).
pub async fn update_thread_state(
    store: &dyn CheckpointStore,
    thread_id: &str,
    checkpoint_ns: &str,
    values: ChannelValues,
    as_node: Option<&str>,
) -> Result<Checkpoint> {
    let mut delta = values;
    delta.insert(
        METADATA_CHANNEL.to_string(),
        json!({ "source": "update", "as_node": as_node }),
    );
    append_with_retry(store, thread_id, checkpoint_ns, delta).await
}

/// Snapshot the current state as a new checkpoint without changing values
pub async fn create_checkpoint(
    store: &dyn CheckpointStore,
    thread_id: &str,
    checkpoint_ns: &str,
) -> Result<Checkpoint> {
    append_with_retry(store, thread_id, checkpoint_ns, ChannelValues::new()).await
}

/// Record engine progress: user values plus the `next` / `tasks` bookkeeping
/// channels, merged over the latest checkpoint.
pub async fn record_progress(
    store: &dyn CheckpointStore,
    thread_id: &str,
    checkpoint_ns: &str,
    values: ChannelValues,
    next: Vec<String>,
    tasks: Vec<Value>,
    source: &str,
) -> Result<Checkpoint> {
    let mut delta = values;
    delta.insert(NEXT_CHANNEL.to_string(), json!(next));
    delta.insert(TASKS_CHANNEL.to_string(), Value::Array(tasks));
    delta.insert(METADATA_CHANNEL.to_string(), json!({ "source": source }));
    append_with_retry(store, thread_id, checkpoint_ns, delta).await
}

/// Seed a root checkpoint on `target_thread_id` carrying the channel values of
/// `source`. The fork shares no ancestry with the source thread.
pub async fn fork_checkpoint(
    store: &dyn CheckpointStore,
    source: &Checkpoint,
    target_thread_id: &str,
) -> Result<Checkpoint> {
    let mut values = source.channel_values.clone();
    values.insert(
        METADATA_CHANNEL.to_string(),
        json!({
            "source": "fork",
            "forked_from": {
                "thread_id": source.thread_id,
                "checkpoint_id": source.checkpoint_id,
            }
        }),
    );
    let root = Checkpoint::root(target_thread_id, source.checkpoint_ns.clone(), values)?
        .with_channel_versions(source.channel_versions.clone());
    store.save(root.clone()).await?;
    Ok(root)
}

async fn append_with_retry(
    store: &dyn CheckpointStore,
    thread_id: &str,
    checkpoint_ns: &str,
    delta: ChannelValues,
) -> Result<Checkpoint> {
    let mut last_err = None;

    for attempt in 1..=MAX_WRITE_ATTEMPTS {
        let next = match store.find_latest(thread_id, checkpoint_ns).await? {
            Some(latest) => latest.child(delta.clone())?,
            None => Checkpoint::root(thread_id, checkpoint_ns, delta.clone())?,
        };

        match store.save(next.clone()).await {
            Ok(()) => return Ok(next),
            Err(err) if err.is_conflict() => {
                tracing::debug!(thread_id, attempt, "checkpoint write raced, retrying");
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        CheckpointError::Storage(format!("could not append checkpoint to thread {thread_id}"))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCheckpointStore;
    use crate::traits::HistoryQuery;

    fn values(v: Value) -> ChannelValues {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_disjoint_updates_accumulate() {
        let store = InMemoryCheckpointStore::new();

        let first = update_thread_state(&store, "t-1", "", values(json!({"a": 1})), None)
            .await
            .unwrap();
        let second = update_thread_state(&store, "t-1", "", values(json!({"b": 2})), None)
            .await
            .unwrap();

        assert_eq!(Value::Object(second.user_values()), json!({"a": 1, "b": 2}));
        assert_eq!(
            second.parent_checkpoint_id.as_deref(),
            Some(first.checkpoint_id.as_str())
        );
        assert!(first.is_root());
    }

    #[tokio::test]
    async fn test_caller_values_win() {
        let store = InMemoryCheckpointStore::new();
        update_thread_state(&store, "t-1", "", values(json!({"a": 1, "keep": true})), None)
            .await
            .unwrap();
        let cp = update_thread_state(&store, "t-1", "", values(json!({"a": 9})), Some("editor"))
            .await
            .unwrap();

        assert_eq!(Value::Object(cp.user_values()), json!({"a": 9, "keep": true}));
        assert_eq!(cp.metadata().get("as_node"), Some(&json!("editor")));
    }

    #[tokio::test]
    async fn test_create_checkpoint_keeps_values() {
        let store = InMemoryCheckpointStore::new();

        let empty = create_checkpoint(&store, "t-1", "").await.unwrap();
        assert!(empty.is_root());
        assert!(empty.channel_values.is_empty());

        let updated = update_thread_state(&store, "t-1", "", values(json!({"x": 1})), None)
            .await
            .unwrap();
        let snap = create_checkpoint(&store, "t-1", "").await.unwrap();
        assert_eq!(snap.channel_values, updated.channel_values);
        assert_eq!(
            snap.parent_checkpoint_id.as_deref(),
            Some(updated.checkpoint_id.as_str())
        );
    }

    #[tokio::test]
    async fn test_concurrent_updates_all_land() {
        let store = InMemoryCheckpointStore::new();
        let mut handles = Vec::new();
        for i in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let key = format!("k{i}");
                let mut delta = ChannelValues::new();
                delta.insert(key, json!(i));
                update_thread_state(&store, "t-1", "", delta, None).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let latest = store.find_latest("t-1", "").await.unwrap().unwrap();
        for i in 0..4 {
            assert_eq!(latest.channel_values.get(&format!("k{i}")), Some(&json!(i)));
        }

        // linear chain: every checkpoint but the root has the previous one as parent
        let history = store.find_history("t-1", "", HistoryQuery::new()).await.unwrap();
        for pair in history.windows(2) {
            assert_eq!(
                pair[0].parent_checkpoint_id.as_deref(),
                Some(pair[1].checkpoint_id.as_str())
            );
        }
    }

    #[tokio::test]
    async fn test_fork_is_independent_root() {
        let store = InMemoryCheckpointStore::new();
        let source = update_thread_state(&store, "src", "", values(json!({"a": 1})), None)
            .await
            .unwrap();

        let fork = fork_checkpoint(&store, &source, "dst").await.unwrap();
        assert!(fork.is_root());
        assert_eq!(fork.user_values(), source.user_values());

        update_thread_state(&store, "src", "", values(json!({"a": 2})), None)
            .await
            .unwrap();
        let dst = get_thread_state(&store, "dst", "").await.unwrap();
        assert_eq!(dst.values.get("a"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_progress_populates_view() {
        let store = InMemoryCheckpointStore::new();
        record_progress(
            &store,
            "t-1",
            "",
            values(json!({"answer": 42})),
            vec!["review".to_string()],
            vec![json!({"id": "task-1", "name": "review"})],
            "loop",
        )
        .await
        .unwrap();

        let state = get_thread_state(&store, "t-1", "").await.unwrap();
        assert_eq!(state.next, vec!["review".to_string()]);
        assert_eq!(state.tasks.len(), 1);
        assert_eq!(state.metadata.get("source"), Some(&json!("loop")));
        assert_eq!(Value::Object(state.values), json!({"answer": 42}));
    }

    #[tokio::test]
    async fn test_state_of_unknown_thread_is_empty() {
        let store = InMemoryCheckpointStore::new();
        let state = get_thread_state(&store, "nobody", "").await.unwrap();
        assert!(state.values.is_empty());
        assert!(state.checkpoint_id.is_none());

        let err = get_thread_state_at(&store, "nobody", "", "cp").await.unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(_)));
    }
}
