//! Streaming chunks emitted while a graph executes

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Kind of data carried by a [`StreamChunk`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    /// Full global state after a node
    Values,
    /// A node's output only
    Updates,
    /// Lifecycle detail for each node
    Debug,
    Messages,
    MessageChunk,
    Error,
}

impl StreamMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamMode::Values => "values",
            StreamMode::Updates => "updates",
            StreamMode::Debug => "debug",
            StreamMode::Messages => "messages",
            StreamMode::MessageChunk => "message_chunk",
            StreamMode::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub mode: StreamMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub data: Value,
}

impl StreamChunk {
    pub fn new(mode: StreamMode, node_id: Option<&str>, data: Value) -> Self {
        Self {
            mode,
            node_id: node_id.map(str::to_string),
            data,
        }
    }
}

/// Receives chunks synchronously from the engine; must not block
pub type StreamCallback = Arc<dyn Fn(StreamChunk) + Send + Sync>;
