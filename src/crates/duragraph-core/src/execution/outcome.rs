//! What a traversal returns and how a paused traversal continues

use crate::execution::state::ResumeSnapshot;
use crate::StateMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Where execution paused relative to the gated node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gate {
    /// Listed in `interrupt_before`; the node has not run
    Before,
    /// Listed in `interrupt_after`; the node ran and its output is merged
    After,
    /// The node itself asked for a human (human node, `requires_human`,
    /// or a paused subgraph)
    Node,
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Gate::Before => "before",
            Gate::After => "after",
            Gate::Node => "node",
        })
    }
}

/// Request to pause raised by a node or a gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptSignal {
    pub node_id: String,
    pub reason: String,
    pub gate: Gate,
    #[serde(default)]
    pub payload: Value,
}

impl InterruptSignal {
    pub fn new(node_id: impl Into<String>, reason: impl Into<String>, gate: Gate) -> Self {
        Self {
            node_id: node_id.into(),
            reason: reason.into(),
            gate,
            payload: Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Tool calls carried in the payload, if any
    pub fn tool_calls(&self) -> Vec<Value> {
        self.payload
            .get("tool_calls")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }
}

/// Result of running a graph to a stopping point
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed(StateMap),
    Interrupted {
        signal: InterruptSignal,
        snapshot: ResumeSnapshot,
    },
}

impl ExecutionOutcome {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, ExecutionOutcome::Interrupted { .. })
    }
}

/// Where and with what a paused traversal continues
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeFrom {
    pub node_id: String,
    pub gate: Gate,
    /// Merged into global state and used as the gated node's output
    pub values: StateMap,
}

impl ResumeFrom {
    pub fn new(node_id: impl Into<String>, gate: Gate, values: StateMap) -> Self {
        Self {
            node_id: node_id.into(),
            gate,
            values,
        }
    }
}
