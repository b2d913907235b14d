//! Persistence seams for the aggregates
//!
//! Each aggregate has an async repository trait. The in-memory implementations
//! in [`memory`] back the server and the tests; a database-backed store only
//! needs to honor the same contracts:
//!
//! - [`RunRepository::save`] rejects a run whose `expected_version` differs
//!   from the stored version with [`DomainError::Conflict`](crate::DomainError::Conflict).
//! - [`InterruptRepository::save`] rejects a second unresolved interrupt for
//!   the same run with `InvalidState`.

pub mod memory;

use crate::assistant::Assistant;
use crate::error::Result;
use crate::execution::GraphResolver;
use crate::graph::Graph;
use crate::humanloop::Interrupt;
use crate::run::Run;
use crate::thread::Thread;
use async_trait::async_trait;
use std::sync::Arc;

pub use memory::{
    InMemoryAssistantRepository, InMemoryGraphRepository, InMemoryInterruptRepository,
    InMemoryRunRepository, InMemoryThreadRepository,
};

#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Insert or update, guarded by [`Run::expected_version`]
    async fn save(&self, run: &Run) -> Result<()>;
    async fn find_by_id(&self, run_id: &str) -> Result<Run>;
    /// Newest first
    async fn find_by_thread(&self, thread_id: &str) -> Result<Vec<Run>>;
    /// Most recent non-terminal run on the thread
    async fn find_active_by_thread(&self, thread_id: &str) -> Result<Option<Run>>;
    async fn delete(&self, run_id: &str) -> Result<()>;
}

#[async_trait]
pub trait InterruptRepository: Send + Sync {
    async fn save(&self, interrupt: &Interrupt) -> Result<()>;
    async fn find_by_id(&self, interrupt_id: &str) -> Result<Interrupt>;
    async fn find_by_run(&self, run_id: &str) -> Result<Vec<Interrupt>>;
    async fn find_unresolved_by_run(&self, run_id: &str) -> Result<Vec<Interrupt>>;
    async fn delete(&self, interrupt_id: &str) -> Result<()>;
}

#[async_trait]
pub trait ThreadRepository: Send + Sync {
    async fn save(&self, thread: &Thread) -> Result<()>;
    async fn find_by_id(&self, thread_id: &str) -> Result<Thread>;
    async fn exists(&self, thread_id: &str) -> Result<bool>;
    async fn delete(&self, thread_id: &str) -> Result<()>;
}

#[async_trait]
pub trait AssistantRepository: Send + Sync {
    async fn save(&self, assistant: &Assistant) -> Result<()>;
    async fn find_by_id(&self, assistant_id: &str) -> Result<Assistant>;
    async fn list(&self) -> Result<Vec<Assistant>>;
}

#[async_trait]
pub trait GraphRepository: Send + Sync {
    async fn save(&self, graph: &Graph) -> Result<()>;
    async fn find_by_id(&self, graph_id: &str) -> Result<Graph>;
    /// Latest graph stored for the assistant
    async fn find_by_assistant(&self, assistant_id: &str) -> Result<Graph>;
}

/// Lets subgraph nodes resolve `graph_id` through a [`GraphRepository`]
///
/// Ids are tried as graph ids first, then as assistant ids.
#[derive(Clone)]
pub struct RepositoryGraphResolver {
    graphs: Arc<dyn GraphRepository>,
}

impl RepositoryGraphResolver {
    pub fn new(graphs: Arc<dyn GraphRepository>) -> Self {
        Self { graphs }
    }
}

#[async_trait]
impl GraphResolver for RepositoryGraphResolver {
    async fn resolve_graph(&self, graph_id: &str) -> Result<Graph> {
        match self.graphs.find_by_id(graph_id).await {
            Ok(graph) => Ok(graph),
            Err(err) if err.is_not_found() => self.graphs.find_by_assistant(graph_id).await,
            Err(err) => Err(err),
        }
    }
}
