//! Per-run scratch state shared by the engine and node executors

use crate::execution::stream::{StreamCallback, StreamChunk, StreamMode};
use crate::execution::subgraph::SubgraphRunner;
use crate::StateMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Mutable traversal state for one graph execution
///
/// A subgraph runs on a [`child`](ExecutionState::child) state: seeded with
/// copied values, one level deeper, fresh completion bookkeeping, and the
/// same callbacks.
#[derive(Clone, Default)]
pub struct ExecutionState {
    pub run_id: String,
    pub current_nodes: Vec<String>,
    pub completed_nodes: HashSet<String>,
    pub node_outputs: HashMap<String, StateMap>,
    pub global_state: StateMap,
    pub iteration: u32,
    pub subgraph_depth: u32,
    /// Dequeue count per node, for the iteration ceiling
    pub visits: HashMap<String, u32>,
    stream: Option<StreamCallback>,
    subgraph_runner: Option<Arc<dyn SubgraphRunner>>,
}

impl ExecutionState {
    pub fn new(run_id: impl Into<String>, input: StateMap) -> Self {
        Self {
            run_id: run_id.into(),
            global_state: input,
            ..Default::default()
        }
    }

    pub fn with_stream_callback(mut self, callback: StreamCallback) -> Self {
        self.stream = Some(callback);
        self
    }

    pub fn with_subgraph_runner(mut self, runner: Arc<dyn SubgraphRunner>) -> Self {
        self.subgraph_runner = Some(runner);
        self
    }

    pub(crate) fn ensure_subgraph_runner(&mut self, runner: impl FnOnce() -> Arc<dyn SubgraphRunner>) {
        if self.subgraph_runner.is_none() {
            self.subgraph_runner = Some(runner());
        }
    }

    pub fn subgraph_runner(&self) -> Option<Arc<dyn SubgraphRunner>> {
        self.subgraph_runner.clone()
    }

    /// State for a nested graph, seeded with `seed`
    pub fn child(&self, seed: StateMap) -> Self {
        Self {
            run_id: self.run_id.clone(),
            global_state: seed,
            subgraph_depth: self.subgraph_depth + 1,
            stream: self.stream.clone(),
            subgraph_runner: self.subgraph_runner.clone(),
            ..Default::default()
        }
    }

    pub fn mark_started(&mut self, node_id: &str) {
        self.current_nodes.push(node_id.to_string());
    }

    pub fn mark_completed(&mut self, node_id: &str, output: StateMap) {
        self.completed_nodes.insert(node_id.to_string());
        self.node_outputs.insert(node_id.to_string(), output);
        self.current_nodes.retain(|id| id != node_id);
    }

    pub fn is_completed(&self, node_id: &str) -> bool {
        self.completed_nodes.contains(node_id)
    }

    pub fn node_output(&self, node_id: &str) -> Option<&StateMap> {
        self.node_outputs.get(node_id)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.global_state.get(key)
    }

    pub fn merge(&mut self, values: &StateMap) {
        for (key, value) in values {
            self.global_state.insert(key.clone(), value.clone());
        }
    }

    /// String list stored under `key`, e.g. `interrupt_before`
    pub fn string_list(&self, key: &str) -> Vec<String> {
        self.global_state
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn emit(&self, mode: StreamMode, node_id: Option<&str>, data: Value) {
        if let Some(callback) = &self.stream {
            callback(StreamChunk::new(mode, node_id, data));
        }
    }

    pub fn snapshot(&self) -> ResumeSnapshot {
        ResumeSnapshot {
            completed_nodes: self.completed_nodes.iter().cloned().collect(),
            node_outputs: self.node_outputs.clone(),
            global_state: self.global_state.clone(),
            iteration: self.iteration,
            visits: self.visits.clone(),
        }
    }

    /// Rebuild from a snapshot; callbacks must be attached again
    pub fn restore(run_id: impl Into<String>, snapshot: ResumeSnapshot) -> Self {
        Self {
            run_id: run_id.into(),
            completed_nodes: snapshot.completed_nodes.into_iter().collect(),
            node_outputs: snapshot.node_outputs,
            global_state: snapshot.global_state,
            iteration: snapshot.iteration,
            visits: snapshot.visits,
            ..Default::default()
        }
    }
}

impl fmt::Debug for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionState")
            .field("run_id", &self.run_id)
            .field("current_nodes", &self.current_nodes)
            .field("completed_nodes", &self.completed_nodes)
            .field("global_state", &self.global_state)
            .field("iteration", &self.iteration)
            .field("subgraph_depth", &self.subgraph_depth)
            .field("streaming", &self.stream.is_some())
            .finish()
    }
}

/// Serializable part of [`ExecutionState`], stored on an interrupt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumeSnapshot {
    pub completed_nodes: BTreeSet<String>,
    #[serde(default)]
    pub node_outputs: HashMap<String, StateMap>,
    #[serde(default)]
    pub global_state: StateMap,
    #[serde(default)]
    pub iteration: u32,
    #[serde(default)]
    pub visits: HashMap<String, u32>,
}

impl ResumeSnapshot {
    pub fn to_value(&self) -> crate::error::Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: &Value) -> crate::error::Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }
}
