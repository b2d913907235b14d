//! Graph execution engine
//!
//! [`GraphEngine`] walks a [`Graph`] with a FIFO work queue:
//!
//! 1. Seed the queue with every `start` node and every node without
//!    incoming edges.
//! 2. Pop a node and count the visit; more than `max_iterations` visits of one
//!    node is fatal.
//! 3. Skip nodes already completed, unless they are `condition` nodes.
//! 4. Re-enqueue the node at the back while any predecessor is incomplete.
//! 5. Honor `interrupt_before`, run the executor, merge its output into
//!    global state, honor `requires_human` and `interrupt_after`.
//! 6. An `end` node whose every non-end node is completed finishes the run
//!    with that node's output.
//! 7. Otherwise enqueue successors whose edge condition matches.
//!
//! If the queue drains without reaching a qualifying `end`, the run finishes
//! with the global state.
//!
//! A pause returns [`ExecutionOutcome::Interrupted`] with a
//! [`ResumeSnapshot`](crate::execution::ResumeSnapshot); feed it back through
//! [`GraphEngine::resume`] to continue without re-running completed nodes.

use crate::error::{DomainError, Result};
use crate::events::ExecutionEvent;
use crate::execution::context::ExecutionContext;
use crate::execution::executor::{ExecutorRegistry, NodeResult};
use crate::execution::outcome::{ExecutionOutcome, Gate, InterruptSignal, ResumeFrom};
use crate::execution::state::ExecutionState;
use crate::execution::stream::StreamMode;
use crate::execution::subgraph::SubgraphRunner;
use crate::graph::{Edge, Graph, Node, NodeType};
use crate::StateMap;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

pub const DEFAULT_MAX_ITERATIONS: u32 = 100;
pub const DEFAULT_MAX_SUBGRAPH_DEPTH: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Visits allowed per node before the run fails
    pub max_iterations: u32,
    pub max_subgraph_depth: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_subgraph_depth: DEFAULT_MAX_SUBGRAPH_DEPTH,
        }
    }
}

/// Adjacency view of a graph built once per traversal
struct ExecutionPlan<'g> {
    graph: &'g Graph,
    nodes: HashMap<&'g str, &'g Node>,
    outgoing: HashMap<&'g str, Vec<&'g Edge>>,
    predecessors: HashMap<&'g str, Vec<&'g str>>,
    start_nodes: Vec<&'g str>,
}

impl<'g> ExecutionPlan<'g> {
    fn build(graph: &'g Graph) -> Result<Self> {
        let nodes: HashMap<&str, &Node> = graph.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

        let mut outgoing: HashMap<&str, Vec<&Edge>> = HashMap::new();
        let mut predecessors: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &graph.edges {
            outgoing.entry(edge.source.as_str()).or_default().push(edge);
            predecessors
                .entry(edge.target.as_str())
                .or_default()
                .push(edge.source.as_str());
        }

        let mut start_nodes: Vec<&str> = graph.start_nodes().map(|n| n.id.as_str()).collect();
        for node in &graph.nodes {
            let id = node.id.as_str();
            if !predecessors.contains_key(id) && !start_nodes.contains(&id) {
                start_nodes.push(id);
            }
        }
        if start_nodes.is_empty() {
            return Err(DomainError::configuration(format!(
                "graph '{}' has no start node",
                graph.id
            )));
        }

        Ok(Self {
            graph,
            nodes,
            outgoing,
            predecessors,
            start_nodes,
        })
    }

    fn node(&self, id: &str) -> Result<&'g Node> {
        self.nodes
            .get(id)
            .copied()
            .ok_or_else(|| DomainError::configuration(format!("unknown node '{id}'")))
    }

    fn dependencies_satisfied(&self, node_id: &str, state: &ExecutionState) -> bool {
        self.predecessors
            .get(node_id)
            .map(|sources| sources.iter().all(|s| state.is_completed(s)))
            .unwrap_or(true)
    }

    fn all_non_end_completed(&self, state: &ExecutionState) -> bool {
        self.graph
            .nodes
            .iter()
            .filter(|n| n.node_type != NodeType::End)
            .all(|n| state.is_completed(&n.id))
    }

    fn successors(&self, node_id: &str, output: &StateMap, state: &ExecutionState) -> Vec<String> {
        self.outgoing
            .get(node_id)
            .map(|edges| {
                edges
                    .iter()
                    .filter(|edge| match &edge.condition {
                        Some(condition) if !condition.is_empty() => {
                            condition_matches(condition, output, state)
                        }
                        _ => true,
                    })
                    .map(|edge| edge.target.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Every condition key must equal the node output value, or else the global
/// state value
fn condition_matches(condition: &StateMap, output: &StateMap, state: &ExecutionState) -> bool {
    condition.iter().all(|(key, expected)| {
        output.get(key) == Some(expected) || state.get(key) == Some(expected)
    })
}

fn requires_human(output: &StateMap) -> bool {
    output
        .get("requires_human")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Work-queue graph interpreter
#[derive(Clone)]
pub struct GraphEngine {
    config: EngineConfig,
    executors: Arc<ExecutorRegistry>,
}

impl GraphEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            executors: Arc::new(ExecutorRegistry::with_defaults(config.max_subgraph_depth)),
            config,
        }
    }

    pub fn with_registry(config: EngineConfig, executors: ExecutorRegistry) -> Self {
        Self {
            config,
            executors: Arc::new(executors),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `graph` from its start nodes with `input` as global state
    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        graph: &Graph,
        input: StateMap,
    ) -> Result<ExecutionOutcome> {
        self.execute_state(ctx, graph, ExecutionState::new(&ctx.run_id, input))
            .await
    }

    /// Run `graph` on a prepared state, e.g. one carrying a stream callback
    pub async fn execute_state(
        &self,
        ctx: &ExecutionContext,
        graph: &Graph,
        mut state: ExecutionState,
    ) -> Result<ExecutionOutcome> {
        let plan = ExecutionPlan::build(graph)?;
        self.attach_runner(&mut state);
        let queue = plan.start_nodes.iter().map(|s| s.to_string()).collect();
        self.drive(ctx, &plan, state, queue, None).await
    }

    /// Continue a paused traversal
    ///
    /// `after`/`node` gates complete the gated node with `from.values` as its
    /// output and move on to its successors. A `before` gate runs the gated
    /// node without checking the gate again.
    pub async fn resume(
        &self,
        ctx: &ExecutionContext,
        graph: &Graph,
        mut state: ExecutionState,
        from: ResumeFrom,
    ) -> Result<ExecutionOutcome> {
        let plan = ExecutionPlan::build(graph)?;
        let node = plan.node(&from.node_id)?;
        self.attach_runner(&mut state);
        state.global_state.remove("requires_human");
        state.merge(&from.values);

        tracing::info!(
            run_id = %ctx.run_id,
            node_id = %from.node_id,
            gate = %from.gate,
            "resuming execution"
        );

        match from.gate {
            Gate::Before => {
                let queue = VecDeque::from([from.node_id.clone()]);
                self.drive(ctx, &plan, state, queue, Some(from.node_id)).await
            }
            Gate::After | Gate::Node => {
                let mut output = state.node_output(&node.id).cloned().unwrap_or_default();
                output.remove("requires_human");
                for (key, value) in &from.values {
                    output.insert(key.clone(), value.clone());
                }
                state.mark_completed(&node.id, output.clone());

                if node.node_type == NodeType::End && plan.all_non_end_completed(&state) {
                    return Ok(ExecutionOutcome::Completed(output));
                }
                let queue = plan.successors(&node.id, &output, &state).into();
                self.drive(ctx, &plan, state, queue, None).await
            }
        }
    }

    fn attach_runner(&self, state: &mut ExecutionState) {
        let engine = self.clone();
        state.ensure_subgraph_runner(move || Arc::new(engine));
    }

    async fn drive(
        &self,
        ctx: &ExecutionContext,
        plan: &ExecutionPlan<'_>,
        mut state: ExecutionState,
        mut queue: VecDeque<String>,
        mut bypass_before: Option<String>,
    ) -> Result<ExecutionOutcome> {
        let interrupt_before = state.string_list("interrupt_before");
        let interrupt_after = state.string_list("interrupt_after");

        while let Some(node_id) = queue.pop_front() {
            if ctx.is_cancelled() {
                return Err(DomainError::Cancelled(ctx.run_id.clone()));
            }

            let visits = state.visits.entry(node_id.clone()).or_insert(0);
            *visits += 1;
            if *visits > self.config.max_iterations {
                return Err(DomainError::MaxIterations {
                    node: node_id,
                    limit: self.config.max_iterations,
                });
            }

            let node = plan.node(&node_id)?;
            if state.is_completed(&node_id) && node.node_type != NodeType::Condition {
                continue;
            }

            if !plan.dependencies_satisfied(&node_id, &state) {
                queue.push_back(node_id);
                continue;
            }

            let bypass = bypass_before.as_deref() == Some(node_id.as_str());
            if bypass {
                bypass_before = None;
            } else if interrupt_before.contains(&node_id) && !state.is_completed(&node_id) {
                state.emit(
                    StreamMode::Debug,
                    Some(&node_id),
                    json!({"event": "interrupt", "interrupt_type": "before"}),
                );
                let signal = InterruptSignal::new(
                    &node_id,
                    format!("interrupt_before: {node_id}"),
                    Gate::Before,
                );
                return Ok(self.pause(ctx, signal, &state));
            }

            let output = match self.run_node(ctx, node, &mut state).await? {
                NodeResult::Output(output) => output,
                NodeResult::Interrupt(signal) => return Ok(self.pause(ctx, signal, &state)),
            };

            if requires_human(&output) {
                let reason = output
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or(crate::execution::executor::DEFAULT_HUMAN_REASON)
                    .to_string();
                let signal = InterruptSignal::new(&node_id, reason, Gate::Node)
                    .with_payload(json!({ "output": output }));
                clear_human_request(&mut state, &output);
                return Ok(self.pause(ctx, signal, &state));
            }

            state.mark_completed(&node_id, output.clone());

            if interrupt_after.contains(&node_id) {
                state.emit(
                    StreamMode::Debug,
                    Some(&node_id),
                    json!({"event": "interrupt", "interrupt_type": "after"}),
                );
                let signal = InterruptSignal::new(
                    &node_id,
                    format!("interrupt_after: {node_id}"),
                    Gate::After,
                )
                .with_payload(json!({ "output": output }));
                return Ok(self.pause(ctx, signal, &state));
            }

            if node.node_type == NodeType::End && plan.all_non_end_completed(&state) {
                tracing::debug!(run_id = %ctx.run_id, node_id = %node_id, "reached end node");
                return Ok(ExecutionOutcome::Completed(output));
            }

            queue.extend(plan.successors(&node_id, &output, &state));
        }

        tracing::warn!(
            run_id = %ctx.run_id,
            graph_id = %plan.graph.id,
            completed = state.completed_nodes.len(),
            "work queue drained without reaching an end node; returning global state"
        );
        Ok(ExecutionOutcome::Completed(state.global_state))
    }

    fn pause(
        &self,
        ctx: &ExecutionContext,
        signal: InterruptSignal,
        state: &ExecutionState,
    ) -> ExecutionOutcome {
        tracing::info!(
            run_id = %ctx.run_id,
            node_id = %signal.node_id,
            gate = %signal.gate,
            reason = %signal.reason,
            "execution paused"
        );
        ExecutionOutcome::Interrupted {
            signal,
            snapshot: state.snapshot(),
        }
    }

    /// Execute one node, merge its output and publish its lifecycle
    async fn run_node(
        &self,
        ctx: &ExecutionContext,
        node: &Node,
        state: &mut ExecutionState,
    ) -> Result<NodeResult> {
        let started = Instant::now();
        state.mark_started(&node.id);
        state.iteration += 1;

        ctx.publish(ExecutionEvent::NodeStarted {
            run_id: ctx.run_id.clone(),
            node_id: node.id.clone(),
            node_type: node.node_type.to_string(),
            occurred_at: Utc::now(),
        });
        state.emit(
            StreamMode::Debug,
            Some(&node.id),
            json!({"event": "node_started", "node_type": node.node_type}),
        );
        tracing::debug!(run_id = %ctx.run_id, node_id = %node.id, node_type = %node.node_type, "executing node");

        let executor = self.executors.get(node.node_type)?;
        let result = match executor.execute(ctx, node, state).await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(run_id = %ctx.run_id, node_id = %node.id, "node failed: {}", err);
                ctx.publish(ExecutionEvent::NodeFailed {
                    run_id: ctx.run_id.clone(),
                    node_id: node.id.clone(),
                    error: err.to_string(),
                    occurred_at: Utc::now(),
                });
                state.emit(
                    StreamMode::Error,
                    Some(&node.id),
                    json!({"error": err.to_string(), "code": err.code()}),
                );
                return Err(wrap_node_error(&node.id, err));
            }
        };

        let NodeResult::Output(output) = result else {
            return Ok(result);
        };

        state.merge(&output);
        let duration_ms = started.elapsed().as_millis() as u64;

        if !output.is_empty() {
            state.emit(
                StreamMode::Updates,
                Some(&node.id),
                Value::Object(output.clone()),
            );
        }
        state.emit(
            StreamMode::Values,
            None,
            Value::Object(state.global_state.clone()),
        );
        state.emit(
            StreamMode::Debug,
            Some(&node.id),
            json!({"event": "node_completed", "duration_ms": duration_ms}),
        );
        ctx.publish(ExecutionEvent::NodeCompleted {
            run_id: ctx.run_id.clone(),
            node_id: node.id.clone(),
            output: Value::Object(output.clone()),
            duration_ms,
            occurred_at: Utc::now(),
        });

        Ok(NodeResult::Output(output))
    }
}

/// Drop the gate flag a node output merged into global state, so later
/// pass-through nodes do not raise the same request again
fn clear_human_request(state: &mut ExecutionState, output: &StateMap) {
    state.global_state.remove("requires_human");
    if let Some(reason) = output.get("reason") {
        if state.global_state.get("reason") == Some(reason) {
            state.global_state.remove("reason");
        }
    }
}

/// Executor errors become `NodeExecution` unless they already carry a
/// classification the run must report as-is
fn wrap_node_error(node_id: &str, err: DomainError) -> DomainError {
    match err {
        DomainError::MaxIterations { .. }
        | DomainError::SubgraphDepthExceeded { .. }
        | DomainError::Configuration(_)
        | DomainError::NodeExecution { .. }
        | DomainError::Cancelled(_)
        | DomainError::NotFound { .. } => err,
        other => DomainError::node_execution(node_id, other.to_string()),
    }
}

impl Default for GraphEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[async_trait]
impl SubgraphRunner for GraphEngine {
    async fn run_subgraph(
        &self,
        ctx: &ExecutionContext,
        graph: &Graph,
        state: ExecutionState,
    ) -> Result<ExecutionOutcome> {
        self.execute_state(ctx, graph, state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingEventSink;
    use crate::execution::context::Cancellation;
    use crate::execution::executor::LlmProvider;

    fn graph(value: Value) -> Graph {
        Graph::from_value("asst", value).unwrap()
    }

    fn linear() -> Graph {
        graph(json!({
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "llm", "type": "llm", "config": {"model": "m"}},
                {"id": "end", "type": "end"}
            ],
            "edges": [
                {"source": "start", "target": "llm"},
                {"source": "llm", "target": "end"}
            ]
        }))
    }

    fn input(pairs: Value) -> StateMap {
        pairs.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_linear_graph_completes_with_end_output() {
        let sink = RecordingEventSink::new();
        let ctx = ExecutionContext::new("run-1", "t").with_event_sink(Arc::new(sink.clone()));

        let outcome = GraphEngine::default()
            .execute(&ctx, &linear(), input(json!({"q": "hi"})))
            .await
            .unwrap();

        let ExecutionOutcome::Completed(output) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(output["q"], json!("hi"));
        assert_eq!(output["response"], json!("LLM response placeholder"));
        assert_eq!(sink.count("node.started"), 3);
        assert_eq!(sink.count("node.completed"), 3);
    }

    #[tokio::test]
    async fn test_condition_cycle_hits_iteration_ceiling() {
        let cyclic = graph(json!({
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "a", "type": "condition"},
                {"id": "b", "type": "condition"},
                {"id": "end", "type": "end"}
            ],
            "edges": [
                {"source": "start", "target": "a"},
                {"source": "a", "target": "b"},
                {"source": "b", "target": "a"}
            ]
        }));
        let ctx = ExecutionContext::new("run-1", "t");
        let err = GraphEngine::default()
            .execute(&ctx, &cyclic, StateMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::MaxIterations { limit: 100, .. }));
    }

    #[tokio::test]
    async fn test_conditional_edges_route_on_output() {
        let routed = graph(json!({
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "check", "type": "condition"},
                {"id": "yes", "type": "tool", "config": {"tool": "approve"}},
                {"id": "no", "type": "tool", "config": {"tool": "reject"}},
                {"id": "end_yes", "type": "end"},
                {"id": "end_no", "type": "end"}
            ],
            "edges": [
                {"source": "start", "target": "check"},
                {"source": "check", "target": "yes", "condition": {"condition_result": true}},
                {"source": "check", "target": "no", "condition": {"condition_result": false}},
                {"source": "yes", "target": "end_yes"},
                {"source": "no", "target": "end_no"}
            ]
        }));
        let ctx = ExecutionContext::new("run-1", "t");
        let outcome = GraphEngine::default()
            .execute(&ctx, &routed, StateMap::new())
            .await
            .unwrap();

        // `no` never runs, so no end node qualifies and the queue drains
        let ExecutionOutcome::Completed(output) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(output["tool"], json!("approve"));
    }

    #[tokio::test]
    async fn test_interrupt_before_then_resume() {
        let ctx = ExecutionContext::new("run-1", "t");
        let engine = GraphEngine::default();
        let outcome = engine
            .execute(&ctx, &linear(), input(json!({"interrupt_before": ["llm"]})))
            .await
            .unwrap();

        let ExecutionOutcome::Interrupted { signal, snapshot } = outcome else {
            panic!("expected interrupt");
        };
        assert_eq!(signal.gate, Gate::Before);
        assert_eq!(signal.node_id, "llm");
        assert!(snapshot.completed_nodes.contains("start"));
        assert!(!snapshot.completed_nodes.contains("llm"));

        let state = ExecutionState::restore("run-1", snapshot);
        let outcome = engine
            .resume(&ctx, &linear(), state, ResumeFrom::new("llm", Gate::Before, StateMap::new()))
            .await
            .unwrap();
        let ExecutionOutcome::Completed(output) = outcome else {
            panic!("expected completion after resume");
        };
        assert_eq!(output["response"], json!("LLM response placeholder"));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_node() {
        let flag = Cancellation::new();
        flag.cancel();
        let ctx = ExecutionContext::new("run-1", "t").with_cancellation(flag);
        let err = GraphEngine::default()
            .execute(&ctx, &linear(), StateMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_stream_callback_sees_values_and_updates() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let ctx = ExecutionContext::new("run-1", "t");
        let state = ExecutionState::new("run-1", StateMap::new())
            .with_stream_callback(Arc::new(move |chunk| sink.lock().push(chunk.mode)));

        GraphEngine::default()
            .execute_state(&ctx, &linear(), state)
            .await
            .unwrap();

        let modes = seen.lock().clone();
        assert!(modes.contains(&StreamMode::Values));
        assert!(modes.contains(&StreamMode::Updates));
        assert!(modes.contains(&StreamMode::Debug));
    }

    #[tokio::test]
    async fn test_node_without_incoming_edges_runs() {
        let fan_in = graph(json!({
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "x", "type": "llm", "config": {"model": "m"}},
                {"id": "end", "type": "end"}
            ],
            "edges": [
                {"source": "start", "target": "end"},
                {"source": "x", "target": "end"}
            ]
        }));
        let ctx = ExecutionContext::new("run-1", "t");
        let outcome = GraphEngine::default()
            .execute(&ctx, &fan_in, input(json!({"q": "hi"})))
            .await
            .unwrap();

        let ExecutionOutcome::Completed(output) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(output["model"], json!("m"));
        assert_eq!(output["q"], json!("hi"));
    }

    struct EscalatingLlm;

    #[async_trait]
    impl LlmProvider for EscalatingLlm {
        async fn complete(&self, _node: &Node, _state: &StateMap) -> Result<StateMap> {
            Ok(input(json!({"requires_human": true, "reason": "low confidence"})))
        }
    }

    #[tokio::test]
    async fn test_output_requested_review_pauses_once() {
        let engine = GraphEngine::with_registry(
            EngineConfig::default(),
            ExecutorRegistry::default().with_llm_provider(Arc::new(EscalatingLlm)),
        );
        let ctx = ExecutionContext::new("run-1", "t");
        let outcome = engine
            .execute(&ctx, &linear(), StateMap::new())
            .await
            .unwrap();

        let ExecutionOutcome::Interrupted { signal, snapshot } = outcome else {
            panic!("expected interrupt");
        };
        assert_eq!(signal.gate, Gate::Node);
        assert_eq!(signal.reason, "low confidence");
        assert!(!snapshot.global_state.contains_key("requires_human"));

        let state = ExecutionState::restore("run-1", snapshot);
        let outcome = engine
            .resume(
                &ctx,
                &linear(),
                state,
                ResumeFrom::new("llm", Gate::Node, input(json!({"approved": true}))),
            )
            .await
            .unwrap();
        let ExecutionOutcome::Completed(output) = outcome else {
            panic!("expected completion after resume, got {outcome:?}");
        };
        assert_eq!(output["approved"], json!(true));
        assert!(!output.contains_key("requires_human"));
    }
}
