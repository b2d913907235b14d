//! Assistants and the graphs they execute

use crate::config::AssistantDefinition;
use crate::services::{resolve_assistant_graph, Repositories};
use duragraph_core::assistant::Assistant;
use duragraph_core::error::{DomainError, Result};
use duragraph_core::graph::{Graph, GraphDefinition};
use duragraph_core::StateMap;

/// Parameters for a new assistant
#[derive(Debug, Clone, Default)]
pub struct CreateAssistant {
    /// Generated when `None`
    pub assistant_id: Option<String>,
    pub name: String,
    pub description: String,
    pub metadata: StateMap,
    pub config: StateMap,
    /// Inline graph, stored under the assistant's graph id
    pub graph: Option<GraphDefinition>,
}

impl From<AssistantDefinition> for CreateAssistant {
    fn from(def: AssistantDefinition) -> Self {
        Self {
            assistant_id: Some(def.id),
            name: def.name,
            description: def.description,
            metadata: def.metadata,
            config: def.config,
            graph: def.graph,
        }
    }
}

#[derive(Clone)]
pub struct AssistantService {
    repos: Repositories,
}

impl AssistantService {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    /// Create an assistant; an existing id is `AlreadyExists`
    pub async fn create(&self, params: CreateAssistant) -> Result<(Assistant, Option<Graph>)> {
        if let Some(id) = params.assistant_id.as_deref() {
            if self.repos.assistants.find_by_id(id).await.is_ok() {
                return Err(DomainError::already_exists("assistant", id));
            }
        }
        self.upsert(params).await
    }

    async fn upsert(&self, params: CreateAssistant) -> Result<(Assistant, Option<Graph>)> {
        let assistant = match params.assistant_id {
            Some(id) => Assistant::with_id(id, params.name)?,
            None => Assistant::new(params.name)?,
        }
        .with_description(params.description)
        .with_metadata(params.metadata)
        .with_config(params.config);

        // build the graph first so an invalid one leaves nothing behind
        let graph = params
            .graph
            .map(|mut def| {
                if def.id.is_empty() {
                    def.id = assistant.graph_id().to_string();
                }
                Graph::from_definition(&assistant.id, def)
            })
            .transpose()?;

        self.repos.assistants.save(&assistant).await?;
        if let Some(graph) = &graph {
            self.repos.graphs.save(graph).await?;
        }

        tracing::info!(
            assistant_id = %assistant.id,
            graph_id = graph.as_ref().map(|g| g.id.as_str()).unwrap_or("-"),
            "assistant saved"
        );
        Ok((assistant, graph))
    }

    pub async fn get(&self, assistant_id: &str) -> Result<Assistant> {
        self.repos.assistants.find_by_id(assistant_id).await
    }

    pub async fn list(&self) -> Result<Vec<Assistant>> {
        self.repos.assistants.list().await
    }

    pub async fn get_graph(&self, assistant_id: &str) -> Result<Graph> {
        let assistant = self.get(assistant_id).await?;
        resolve_assistant_graph(&self.repos.graphs, &assistant).await
    }

    /// Store definitions loaded at startup, replacing same-id assistants
    pub async fn preload(&self, definitions: Vec<AssistantDefinition>) -> Result<usize> {
        let count = definitions.len();
        for def in definitions {
            self.upsert(def.into()).await?;
        }
        Ok(count)
    }
}
