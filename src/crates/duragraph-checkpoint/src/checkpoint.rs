//! Core checkpoint data structures
//!
//! A [`Checkpoint`] is an immutable snapshot of a thread's channel values at a
//! point in time. Checkpoints in the same `(thread_id, checkpoint_ns)` stream
//! are linked through `parent_checkpoint_id`, forming a tree whose root has no
//! parent:
//!
//! ```text
//!   thread "t-1", ns ""
//!
//!   cp-a (root) ──► cp-b ──► cp-c   (latest)
//!                     │
//!   thread "t-2" (fork of t-1 at cp-b)
//!   cp-x (root, values copied from cp-b)
//! ```
//!
//! Updates never mutate a stored checkpoint; they produce a child carrying the
//! merged values (see [`Checkpoint::child`]).
//!
//! Reserved channels hold bookkeeping rather than user state:
//!
//! | Channel | Meaning |
//! |---------|---------|
//! | [`NEXT_CHANNEL`] | Node ids scheduled to run next |
//! | [`TASKS_CHANNEL`] | Pending tasks (interrupts) |
//! | [`METADATA_CHANNEL`] | Source of the checkpoint (`update`, `loop`, `fork`, ...) |

use crate::error::{CheckpointError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Channel name to value map
pub type ChannelValues = serde_json::Map<String, Value>;

/// Channel holding the ids of nodes to run next
pub const NEXT_CHANNEL: &str = "__next__";
/// Channel holding pending tasks
pub const TASKS_CHANNEL: &str = "__tasks__";
/// Channel holding checkpoint metadata
pub const METADATA_CHANNEL: &str = "__metadata__";

/// Whether a channel name is reserved for bookkeeping
pub fn is_reserved_channel(name: &str) -> bool {
    name.starts_with("__") && name.ends_with("__")
}

/// Immutable snapshot of a thread's state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Storage identity
    pub id: String,
    /// Owning thread
    pub thread_id: String,
    /// Namespace within the thread (empty for the top-level graph)
    #[serde(default)]
    pub checkpoint_ns: String,
    /// Checkpoint identity within the (thread, namespace) stream
    pub checkpoint_id: String,
    /// Parent checkpoint in the same stream, `None` for a root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_checkpoint_id: Option<String>,
    /// Channel values
    #[serde(default)]
    pub channel_values: ChannelValues,
    /// Per-channel versions, carried opaquely
    #[serde(default)]
    pub channel_versions: HashMap<String, Value>,
    /// Channel versions seen by each node, carried opaquely
    #[serde(default)]
    pub versions_seen: HashMap<String, HashMap<String, Value>>,
    /// Sends not yet delivered
    #[serde(default)]
    pub pending_sends: Vec<Value>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Create a checkpoint, generating a checkpoint id when `checkpoint_id` is empty
    pub fn new(
        thread_id: impl Into<String>,
        checkpoint_ns: impl Into<String>,
        checkpoint_id: impl Into<String>,
        parent_checkpoint_id: Option<String>,
        channel_values: ChannelValues,
    ) -> Result<Self> {
        let thread_id = thread_id.into();
        if thread_id.is_empty() {
            return Err(CheckpointError::Invalid("thread_id is required".to_string()));
        }

        let mut checkpoint_id = checkpoint_id.into();
        if checkpoint_id.is_empty() {
            checkpoint_id = Uuid::new_v4().to_string();
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            thread_id,
            checkpoint_ns: checkpoint_ns.into(),
            checkpoint_id,
            parent_checkpoint_id: parent_checkpoint_id.filter(|p| !p.is_empty()),
            channel_values,
            channel_versions: HashMap::new(),
            versions_seen: HashMap::new(),
            pending_sends: Vec::new(),
            created_at: Utc::now(),
        })
    }

    /// Create a root checkpoint (no parent)
    pub fn root(
        thread_id: impl Into<String>,
        checkpoint_ns: impl Into<String>,
        channel_values: ChannelValues,
    ) -> Result<Self> {
        Self::new(thread_id, checkpoint_ns, "", None, channel_values)
    }

    /// Create the next checkpoint in this stream with `delta` merged over the
    /// current values. Keys in `delta` win; keys absent from it persist.
    pub fn child(&self, delta: ChannelValues) -> Result<Self> {
        let mut values = self.channel_values.clone();
        for (key, value) in delta {
            values.insert(key, value);
        }

        let mut child = Self::new(
            self.thread_id.clone(),
            self.checkpoint_ns.clone(),
            "",
            Some(self.checkpoint_id.clone()),
            values,
        )?;
        child.channel_versions = self.channel_versions.clone();
        child.versions_seen = self.versions_seen.clone();
        Ok(child)
    }

    /// Set channel versions
    pub fn with_channel_versions(mut self, versions: HashMap<String, Value>) -> Self {
        self.channel_versions = versions;
        self
    }

    /// Set pending sends
    pub fn with_pending_sends(mut self, sends: Vec<Value>) -> Self {
        self.pending_sends = sends;
        self
    }

    /// Whether this checkpoint starts its stream
    pub fn is_root(&self) -> bool {
        self.parent_checkpoint_id.is_none()
    }

    /// Channel values without reserved bookkeeping channels
    pub fn user_values(&self) -> ChannelValues {
        self.channel_values
            .iter()
            .filter(|(k, _)| !is_reserved_channel(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Node ids recorded in [`NEXT_CHANNEL`]
    pub fn next_nodes(&self) -> Vec<String> {
        self.channel_values
            .get(NEXT_CHANNEL)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Task objects recorded in [`TASKS_CHANNEL`]
    pub fn tasks(&self) -> Vec<Value> {
        self.channel_values
            .get(TASKS_CHANNEL)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter(|v| v.is_object()).cloned().collect())
            .unwrap_or_default()
    }

    /// Metadata object recorded in [`METADATA_CHANNEL`]
    pub fn metadata(&self) -> ChannelValues {
        self.channel_values
            .get(METADATA_CHANNEL)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }
}

/// A pending write attached to a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointWrite {
    pub thread_id: String,
    #[serde(default)]
    pub checkpoint_ns: String,
    pub checkpoint_id: String,
    pub task_id: String,
    pub idx: i32,
    pub channel: String,
    #[serde(rename = "type", default)]
    pub write_type: String,
    pub blob: Value,
}

impl CheckpointWrite {
    pub fn new(
        checkpoint: &Checkpoint,
        task_id: impl Into<String>,
        idx: i32,
        channel: impl Into<String>,
        blob: Value,
    ) -> Self {
        Self {
            thread_id: checkpoint.thread_id.clone(),
            checkpoint_ns: checkpoint.checkpoint_ns.clone(),
            checkpoint_id: checkpoint.checkpoint_id.clone(),
            task_id: task_id.into(),
            idx,
            channel: channel.into(),
            write_type: "json".to_string(),
            blob,
        }
    }
}
