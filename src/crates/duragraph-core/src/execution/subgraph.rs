//! Nested graph execution
//!
//! A `subgraph` node runs another graph on a child [`ExecutionState`]:
//!
//! ```text
//! parent global state ──inputs──► child state (depth + 1)
//!                                      │ SubgraphRunner
//!                                      ▼
//! parent node output ◄──outputs── child final state
//! ```
//!
//! Node config:
//!
//! - `graph_id` - graph looked up through a [`GraphResolver`], or
//! - `graph` - inline `{nodes, edges}` definition
//! - `inputs` / `outputs` - key lists to copy; empty or absent means all
//!
//! A child interrupt surfaces as an interrupt at the parent's subgraph node
//! with the child's signal carried unchanged under `payload.subgraph`.

use crate::error::{DomainError, Result};
use crate::execution::context::ExecutionContext;
use crate::execution::executor::{NodeExecutor, NodeResult};
use crate::execution::outcome::{ExecutionOutcome, Gate, InterruptSignal};
use crate::execution::state::ExecutionState;
use crate::graph::{Graph, Node};
use crate::StateMap;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Looks up stored graphs by id
#[async_trait]
pub trait GraphResolver: Send + Sync {
    async fn resolve_graph(&self, graph_id: &str) -> Result<Graph>;
}

/// Runs a graph on a prepared state; implemented by the engine
#[async_trait]
pub trait SubgraphRunner: Send + Sync {
    async fn run_subgraph(
        &self,
        ctx: &ExecutionContext,
        graph: &Graph,
        state: ExecutionState,
    ) -> Result<ExecutionOutcome>;
}

pub struct SubgraphExecutor {
    max_depth: u32,
    resolver: Option<Arc<dyn GraphResolver>>,
}

impl SubgraphExecutor {
    pub fn new(max_depth: u32) -> Self {
        Self {
            max_depth,
            resolver: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn GraphResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    async fn load_graph(&self, node: &Node) -> Result<Graph> {
        if let Some(graph_id) = node.config_str("graph_id").filter(|id| !id.is_empty()) {
            let resolver = self.resolver.as_ref().ok_or_else(|| {
                DomainError::configuration(format!(
                    "subgraph node '{}' references graph '{}' but no graph resolver is configured",
                    node.id, graph_id
                ))
            })?;
            return resolver.resolve_graph(graph_id).await;
        }

        match node.config.get("graph") {
            Some(inline @ Value::Object(_)) => {
                Graph::from_value(format!("{}:subgraph", node.id), inline.clone()).map_err(|e| {
                    DomainError::configuration(format!(
                        "subgraph node '{}' has an invalid inline graph: {}",
                        node.id, e
                    ))
                })
            }
            _ => Err(DomainError::configuration(format!(
                "subgraph node '{}' requires 'graph_id' or 'graph' in config",
                node.id
            ))),
        }
    }
}

fn key_list(node: &Node, key: &str) -> Vec<String> {
    node.config
        .get(key)
        .and_then(Value::as_array)
        .map(|keys| {
            keys.iter()
                .filter_map(|k| k.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Copy `keys` from `source`, or everything when `keys` is empty
fn project(source: &StateMap, keys: &[String]) -> StateMap {
    if keys.is_empty() {
        return source.clone();
    }
    keys.iter()
        .filter_map(|k| source.get(k).map(|v| (k.clone(), v.clone())))
        .collect()
}

#[async_trait]
impl NodeExecutor for SubgraphExecutor {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        node: &Node,
        state: &ExecutionState,
    ) -> Result<NodeResult> {
        if state.subgraph_depth >= self.max_depth {
            return Err(DomainError::SubgraphDepthExceeded {
                depth: state.subgraph_depth + 1,
                max: self.max_depth,
            });
        }

        let runner = state.subgraph_runner().ok_or_else(|| {
            DomainError::configuration("subgraph execution is not configured")
        })?;
        let graph = self.load_graph(node).await?;

        let seed = project(&state.global_state, &key_list(node, "inputs"));
        let child = state.child(seed);
        tracing::debug!(
            run_id = %ctx.run_id,
            node_id = %node.id,
            subgraph = %graph.id,
            depth = child.subgraph_depth,
            "entering subgraph"
        );

        match runner.run_subgraph(ctx, &graph, child).await? {
            ExecutionOutcome::Completed(output) => Ok(NodeResult::Output(project(
                &output,
                &key_list(node, "outputs"),
            ))),
            ExecutionOutcome::Interrupted { signal, .. } => {
                let reason = signal.reason.clone();
                Ok(NodeResult::Interrupt(
                    InterruptSignal::new(&node.id, reason, Gate::Node)
                        .with_payload(json!({ "subgraph": signal, "graph_id": graph.id })),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRunner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SubgraphRunner for CountingRunner {
        async fn run_subgraph(
            &self,
            _ctx: &ExecutionContext,
            _graph: &Graph,
            state: ExecutionState,
        ) -> Result<ExecutionOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut out = state.global_state.clone();
            out.insert("depth".into(), json!(state.subgraph_depth));
            Ok(ExecutionOutcome::Completed(out))
        }
    }

    fn inline_node(extra: Value) -> Node {
        let mut config = StateMap::new();
        config.insert(
            "graph".into(),
            json!({
                "nodes": [{"id": "s", "type": "start"}, {"id": "e", "type": "end"}],
                "edges": [{"source": "s", "target": "e"}]
            }),
        );
        if let Value::Object(extra) = extra {
            config.extend(extra);
        }
        Node::new("sub", crate::graph::NodeType::Subgraph).with_config(config)
    }

    fn parent_state(runner: Arc<CountingRunner>) -> ExecutionState {
        let mut input = StateMap::new();
        input.insert("a".into(), json!(1));
        input.insert("b".into(), json!(2));
        ExecutionState::new("run-1", input).with_subgraph_runner(runner)
    }

    #[tokio::test]
    async fn test_inputs_and_outputs_are_projected() {
        let runner = Arc::new(CountingRunner { calls: AtomicUsize::new(0) });
        let node = inline_node(json!({"inputs": ["a"], "outputs": ["a", "depth"]}));
        let ctx = ExecutionContext::new("run-1", "t");

        let result = SubgraphExecutor::new(10)
            .execute(&ctx, &node, &parent_state(runner.clone()))
            .await
            .unwrap();

        let NodeResult::Output(out) = result else {
            panic!("expected output");
        };
        assert_eq!(out.len(), 2);
        assert_eq!(out["a"], json!(1));
        assert_eq!(out["depth"], json!(1));
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_depth_limit_checked_before_runner() {
        let runner = Arc::new(CountingRunner { calls: AtomicUsize::new(0) });
        let mut state = parent_state(runner.clone());
        state.subgraph_depth = 10;
        let ctx = ExecutionContext::new("run-1", "t");

        let err = SubgraphExecutor::new(10)
            .execute(&ctx, &inline_node(Value::Null), &state)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DomainError::SubgraphDepthExceeded { depth: 11, max: 10 }
        ));
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_graph_id_without_resolver_is_configuration_error() {
        let runner = Arc::new(CountingRunner { calls: AtomicUsize::new(0) });
        let mut config = StateMap::new();
        config.insert("graph_id".into(), json!("g-1"));
        let node = Node::new("sub", crate::graph::NodeType::Subgraph).with_config(config);
        let ctx = ExecutionContext::new("run-1", "t");

        let err = SubgraphExecutor::new(10)
            .execute(&ctx, &node, &parent_state(runner))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Configuration(_)));
    }
}
