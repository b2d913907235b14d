//! Node executors, one per [`NodeType`]
//!
//! The engine looks executors up in an [`ExecutorRegistry`]. Defaults:
//!
//! | Type | Output |
//! |------|--------|
//! | `start`, `end` | copy of global state |
//! | `llm` | whatever the [`LlmProvider`] returns |
//! | `tool` | whatever the [`ToolInvoker`] returns |
//! | `condition` | `{condition_result: true}` |
//! | `human` | always an interrupt |
//! | `subgraph` | see [`SubgraphExecutor`] |
//!
//! Real model and tool backends plug in through [`LlmProvider`] and
//! [`ToolInvoker`]; the built-in ones return placeholders.

use crate::error::{DomainError, Result};
use crate::execution::context::ExecutionContext;
use crate::execution::outcome::{Gate, InterruptSignal};
use crate::execution::state::ExecutionState;
use crate::execution::subgraph::{GraphResolver, SubgraphExecutor};
use crate::graph::{Node, NodeType};
use crate::StateMap;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_HUMAN_REASON: &str = "human input required";

/// What a node produced
#[derive(Debug, Clone, PartialEq)]
pub enum NodeResult {
    /// Merged into global state
    Output(StateMap),
    /// Pause the run
    Interrupt(InterruptSignal),
}

#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        node: &Node,
        state: &ExecutionState,
    ) -> Result<NodeResult>;
}

/// Model backend used by `llm` nodes
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, node: &Node, state: &StateMap) -> Result<StateMap>;
}

/// Tool backend used by `tool` nodes
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, tool: &str, node: &Node, state: &StateMap) -> Result<StateMap>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderLlm;

#[async_trait]
impl LlmProvider for PlaceholderLlm {
    async fn complete(&self, node: &Node, _state: &StateMap) -> Result<StateMap> {
        let mut output = StateMap::new();
        output.insert("response".into(), json!("LLM response placeholder"));
        output.insert(
            "model".into(),
            node.config.get("model").cloned().unwrap_or(Value::Null),
        );
        Ok(output)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderTools;

#[async_trait]
impl ToolInvoker for PlaceholderTools {
    async fn invoke(&self, tool: &str, _node: &Node, _state: &StateMap) -> Result<StateMap> {
        let mut output = StateMap::new();
        output.insert("result".into(), json!("Tool execution placeholder"));
        output.insert("tool".into(), json!(tool));
        Ok(output)
    }
}

/// `start` and `end`: pass global state through
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughExecutor;

#[async_trait]
impl NodeExecutor for PassThroughExecutor {
    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        _node: &Node,
        state: &ExecutionState,
    ) -> Result<NodeResult> {
        Ok(NodeResult::Output(state.global_state.clone()))
    }
}

pub struct LlmExecutor {
    provider: Arc<dyn LlmProvider>,
}

impl LlmExecutor {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl NodeExecutor for LlmExecutor {
    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        node: &Node,
        state: &ExecutionState,
    ) -> Result<NodeResult> {
        let output = self.provider.complete(node, &state.global_state).await?;
        Ok(NodeResult::Output(output))
    }
}

pub struct ToolExecutor {
    invoker: Arc<dyn ToolInvoker>,
}

impl ToolExecutor {
    pub fn new(invoker: Arc<dyn ToolInvoker>) -> Self {
        Self { invoker }
    }
}

#[async_trait]
impl NodeExecutor for ToolExecutor {
    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        node: &Node,
        state: &ExecutionState,
    ) -> Result<NodeResult> {
        let tool = node.config_str("tool").unwrap_or(node.id.as_str());
        let output = self.invoker.invoke(tool, node, &state.global_state).await?;
        Ok(NodeResult::Output(output))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ConditionExecutor;

#[async_trait]
impl NodeExecutor for ConditionExecutor {
    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        _node: &Node,
        _state: &ExecutionState,
    ) -> Result<NodeResult> {
        let mut output = StateMap::new();
        output.insert("condition_result".into(), json!(true));
        Ok(NodeResult::Output(output))
    }
}

/// Always pauses with `config.reason`
#[derive(Debug, Default, Clone, Copy)]
pub struct HumanExecutor;

#[async_trait]
impl NodeExecutor for HumanExecutor {
    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        node: &Node,
        state: &ExecutionState,
    ) -> Result<NodeResult> {
        let reason = node.config_str("reason").unwrap_or(DEFAULT_HUMAN_REASON);
        let mut payload = json!({ "node_type": "human" });
        if let Some(calls) = node.config.get("tool_calls") {
            payload["tool_calls"] = calls.clone();
        }
        if let Some(prompt) = node.config.get("prompt") {
            payload["prompt"] = prompt.clone();
        }
        tracing::debug!(run_id = %state.run_id, node_id = %node.id, "human node requests input");
        Ok(NodeResult::Interrupt(
            InterruptSignal::new(&node.id, reason, Gate::Node).with_payload(payload),
        ))
    }
}

/// Executors keyed by node type
#[derive(Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<NodeType, Arc<dyn NodeExecutor>>,
    max_subgraph_depth: u32,
}

impl ExecutorRegistry {
    /// Built-in executors with placeholder model and tool backends
    pub fn with_defaults(max_subgraph_depth: u32) -> Self {
        let mut executors: HashMap<NodeType, Arc<dyn NodeExecutor>> = HashMap::new();
        executors.insert(NodeType::Start, Arc::new(PassThroughExecutor));
        executors.insert(NodeType::End, Arc::new(PassThroughExecutor));
        executors.insert(NodeType::Llm, Arc::new(LlmExecutor::new(Arc::new(PlaceholderLlm))));
        executors.insert(
            NodeType::Tool,
            Arc::new(ToolExecutor::new(Arc::new(PlaceholderTools))),
        );
        executors.insert(NodeType::Condition, Arc::new(ConditionExecutor));
        executors.insert(NodeType::Human, Arc::new(HumanExecutor));
        executors.insert(
            NodeType::Subgraph,
            Arc::new(SubgraphExecutor::new(max_subgraph_depth)),
        );
        Self {
            executors,
            max_subgraph_depth,
        }
    }

    pub fn register(mut self, node_type: NodeType, executor: Arc<dyn NodeExecutor>) -> Self {
        self.executors.insert(node_type, executor);
        self
    }

    pub fn with_llm_provider(self, provider: Arc<dyn LlmProvider>) -> Self {
        self.register(NodeType::Llm, Arc::new(LlmExecutor::new(provider)))
    }

    pub fn with_tool_invoker(self, invoker: Arc<dyn ToolInvoker>) -> Self {
        self.register(NodeType::Tool, Arc::new(ToolExecutor::new(invoker)))
    }

    /// Let subgraph nodes resolve `graph_id` references
    pub fn with_graph_resolver(self, resolver: Arc<dyn GraphResolver>) -> Self {
        let depth = self.max_subgraph_depth;
        self.register(
            NodeType::Subgraph,
            Arc::new(SubgraphExecutor::new(depth).with_resolver(resolver)),
        )
    }

    pub fn get(&self, node_type: NodeType) -> Result<Arc<dyn NodeExecutor>> {
        self.executors.get(&node_type).cloned().ok_or_else(|| {
            DomainError::configuration(format!("no executor registered for node type {node_type}"))
        })
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::with_defaults(crate::execution::engine::DEFAULT_MAX_SUBGRAPH_DEPTH)
    }
}
