//! Graph definitions
//!
//! A [`Graph`] is a list of typed [`Node`]s and directed [`Edge`]s. Graphs are
//! stored per assistant and come from inline JSON (`{nodes, edges}`) or YAML
//! definition files:
//!
//! ```yaml
//! id: support-bot
//! name: Support bot
//! nodes:
//!   - { id: start, type: start }
//!   - { id: answer, type: llm, config: { model: gpt-4o } }
//!   - { id: end, type: end }
//! edges:
//!   - { source: start, target: answer }
//!   - { source: answer, target: end }
//! ```
//!
//! [`Graph::validate`] enforces the structural rules the engine relies on.

use crate::error::{DomainError, Result};
use crate::StateMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;

pub const DEFAULT_GRAPH_VERSION: &str = "1.0.0";

/// Kind of work a node performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Start,
    Llm,
    Tool,
    Condition,
    End,
    Subgraph,
    Human,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Start => "start",
            NodeType::Llm => "llm",
            NodeType::Tool => "tool",
            NodeType::Condition => "condition",
            NodeType::End => "end",
            NodeType::Subgraph => "subgraph",
            NodeType::Human => "human",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub config: StateMap,
    /// UI position, carried opaquely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<HashMap<String, f64>>,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            node_type,
            config: StateMap::new(),
            position: None,
        }
    }

    pub fn with_config(mut self, config: StateMap) -> Self {
        self.config = config;
        self
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub target: String,
    /// Key/value pairs matched against the source output, then global state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<StateMap>,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("{source}->{target}"),
            source,
            target,
            condition: None,
        }
    }

    pub fn with_condition(mut self, condition: StateMap) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// Serialized graph body as posted inline or loaded from YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDefinition {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub config: StateMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub id: String,
    pub assistant_id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub config: StateMap,
    pub created_at: DateTime<Utc>,
}

impl Graph {
    /// Build and validate a graph from its definition
    pub fn from_definition(assistant_id: impl Into<String>, def: GraphDefinition) -> Result<Self> {
        let assistant_id = assistant_id.into();
        let id = if def.id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            def.id
        };
        let edges = def
            .edges
            .into_iter()
            .map(|mut edge| {
                if edge.id.is_empty() {
                    edge.id = format!("{}->{}", edge.source, edge.target);
                }
                edge
            })
            .collect();

        let graph = Self {
            name: if def.name.is_empty() { id.clone() } else { def.name },
            id,
            assistant_id,
            version: def
                .version
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_GRAPH_VERSION.to_string()),
            description: def.description,
            nodes: def.nodes,
            edges,
            config: def.config,
            created_at: Utc::now(),
        };
        graph.validate()?;
        Ok(graph)
    }

    /// Inline JSON `{nodes, edges, ...}`
    pub fn from_value(assistant_id: impl Into<String>, value: Value) -> Result<Self> {
        let def: GraphDefinition = serde_json::from_value(value)?;
        Self::from_definition(assistant_id, def)
    }

    pub fn from_yaml(assistant_id: impl Into<String>, yaml: &str) -> Result<Self> {
        let def: GraphDefinition = serde_yaml::from_str(yaml)?;
        Self::from_definition(assistant_id, def)
    }

    /// Structural rules: non-empty, has start and end, unique ids, edges resolve
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(DomainError::invalid_input("nodes", "graph must have at least one node"));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.id.trim().is_empty() {
                return Err(DomainError::invalid_input("nodes", "node id must not be empty"));
            }
            if !seen.insert(node.id.as_str()) {
                return Err(DomainError::invalid_input(
                    "nodes",
                    format!("duplicate node id '{}'", node.id),
                ));
            }
        }

        if !self.nodes.iter().any(|n| n.node_type == NodeType::Start) {
            return Err(DomainError::invalid_input("nodes", "graph must have a start node"));
        }
        if !self.nodes.iter().any(|n| n.node_type == NodeType::End) {
            return Err(DomainError::invalid_input("nodes", "graph must have an end node"));
        }

        for edge in &self.edges {
            if edge.source.is_empty() || edge.target.is_empty() {
                return Err(DomainError::invalid_input(
                    "edges",
                    format!("edge '{}' must have a source and a target", edge.id),
                ));
            }
            for endpoint in [&edge.source, &edge.target] {
                if !seen.contains(endpoint.as_str()) {
                    return Err(DomainError::invalid_input(
                        "edges",
                        format!("edge '{}' references unknown node '{}'", edge.id, endpoint),
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn start_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.node_type == NodeType::Start)
    }

    pub fn outgoing(&self, node_id: &str) -> impl Iterator<Item = &Edge> {
        let node_id = node_id.to_string();
        self.edges.iter().filter(move |e| e.source == node_id)
    }

    pub fn definition(&self) -> GraphDefinition {
        GraphDefinition {
            id: self.id.clone(),
            name: self.name.clone(),
            version: Some(self.version.clone()),
            description: self.description.clone(),
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
            config: self.config.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn linear() -> Value {
        json!({
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "llm", "type": "llm", "config": {"model": "gpt-4o"}},
                {"id": "end", "type": "end"}
            ],
            "edges": [
                {"source": "start", "target": "llm"},
                {"source": "llm", "target": "end"}
            ]
        })
    }

    #[test]
    fn test_inline_graph_defaults() {
        let graph = Graph::from_value("asst-1", linear()).unwrap();
        assert_eq!(graph.assistant_id, "asst-1");
        assert_eq!(graph.version, DEFAULT_GRAPH_VERSION);
        assert_eq!(graph.edges[0].id, "start->llm");
        assert_eq!(graph.node("llm").unwrap().config_str("model"), Some("gpt-4o"));
        assert_eq!(graph.outgoing("start").count(), 1);
    }

    #[test]
    fn test_missing_end_is_rejected() {
        let err = Graph::from_value(
            "a",
            json!({"nodes": [{"id": "s", "type": "start"}], "edges": []}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("end node"));
    }

    #[test]
    fn test_duplicate_and_dangling() {
        let dup = json!({
            "nodes": [{"id": "s", "type": "start"}, {"id": "s", "type": "end"}],
            "edges": []
        });
        assert!(Graph::from_value("a", dup).is_err());

        let dangling = json!({
            "nodes": [{"id": "s", "type": "start"}, {"id": "e", "type": "end"}],
            "edges": [{"source": "s", "target": "nowhere"}]
        });
        let err = Graph::from_value("a", dangling).unwrap_err();
        assert!(err.to_string().contains("nowhere"));
    }

    #[test]
    fn test_empty_graph_is_rejected() {
        assert!(Graph::from_value("a", json!({"nodes": [], "edges": []})).is_err());
    }

    #[test]
    fn test_unknown_node_type_fails_to_parse() {
        let value = json!({"nodes": [{"id": "x", "type": "quantum"}]});
        assert!(matches!(
            Graph::from_value("a", value),
            Err(DomainError::Serialization(_))
        ));
    }

    #[test]
    fn test_yaml_definition() {
        let yaml = r#"
id: support
name: Support
nodes:
  - { id: start, type: start }
  - { id: check, type: condition }
  - { id: end, type: end }
edges:
  - { source: start, target: check }
  - { source: check, target: end, condition: { route: done } }
"#;
        let graph = Graph::from_yaml("asst", yaml).unwrap();
        assert_eq!(graph.id, "support");
        let edge = graph.outgoing("check").next().unwrap();
        assert_eq!(edge.condition.as_ref().unwrap()["route"], json!("done"));
    }
}
