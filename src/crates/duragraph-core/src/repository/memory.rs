//! In-memory repositories
//!
//! Every store is an `Arc<RwLock<HashMap>>`, cheap to clone and shared between
//! services. Nothing survives a restart.

use crate::assistant::Assistant;
use crate::error::{DomainError, Result};
use crate::graph::Graph;
use crate::humanloop::Interrupt;
use crate::repository::{
    AssistantRepository, GraphRepository, InterruptRepository, RunRepository, ThreadRepository,
};
use crate::run::{Run, RunSnapshot};
use crate::thread::Thread;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Runs stored as committed projections
#[derive(Debug, Clone, Default)]
pub struct InMemoryRunRepository {
    runs: Arc<RwLock<HashMap<String, RunSnapshot>>>,
}

impl InMemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run_count(&self) -> usize {
        self.runs.read().await.len()
    }
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn save(&self, run: &Run) -> Result<()> {
        let mut runs = self.runs.write().await;
        let stored_version = runs.get(&run.id).map(|r| r.version).unwrap_or(0);
        let expected = run.expected_version();
        if stored_version != expected {
            return Err(DomainError::Conflict(format!(
                "run {} was modified concurrently (expected version {}, found {})",
                run.id, expected, stored_version
            )));
        }
        runs.insert(run.id.clone(), run.snapshot());
        Ok(())
    }

    async fn find_by_id(&self, run_id: &str) -> Result<Run> {
        self.runs
            .read()
            .await
            .get(run_id)
            .cloned()
            .map(Run::restore)
            .ok_or_else(|| DomainError::not_found("run", run_id))
    }

    async fn find_by_thread(&self, thread_id: &str) -> Result<Vec<Run>> {
        let mut runs: Vec<Run> = self
            .runs
            .read()
            .await
            .values()
            .filter(|r| r.thread_id == thread_id)
            .cloned()
            .map(Run::restore)
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }

    async fn find_active_by_thread(&self, thread_id: &str) -> Result<Option<Run>> {
        Ok(self
            .find_by_thread(thread_id)
            .await?
            .into_iter()
            .find(|r| r.status.is_active()))
    }

    async fn delete(&self, run_id: &str) -> Result<()> {
        self.runs
            .write()
            .await
            .remove(run_id)
            .map(|_| ())
            .ok_or_else(|| DomainError::not_found("run", run_id))
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryInterruptRepository {
    interrupts: Arc<RwLock<HashMap<String, Interrupt>>>,
}

impl InMemoryInterruptRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InterruptRepository for InMemoryInterruptRepository {
    async fn save(&self, interrupt: &Interrupt) -> Result<()> {
        let mut interrupts = self.interrupts.write().await;
        if !interrupt.resolved {
            let other_open = interrupts
                .values()
                .find(|i| i.run_id == interrupt.run_id && i.id != interrupt.id && !i.resolved);
            if let Some(open) = other_open {
                return Err(DomainError::invalid_state(
                    format!("awaiting interrupt {}", open.id),
                    "open a second interrupt",
                ));
            }
        }
        let mut stored = interrupt.clone();
        stored.take_events();
        interrupts.insert(stored.id.clone(), stored);
        Ok(())
    }

    async fn find_by_id(&self, interrupt_id: &str) -> Result<Interrupt> {
        self.interrupts
            .read()
            .await
            .get(interrupt_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("interrupt", interrupt_id))
    }

    async fn find_by_run(&self, run_id: &str) -> Result<Vec<Interrupt>> {
        let mut found: Vec<Interrupt> = self
            .interrupts
            .read()
            .await
            .values()
            .filter(|i| i.run_id == run_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    async fn find_unresolved_by_run(&self, run_id: &str) -> Result<Vec<Interrupt>> {
        Ok(self
            .find_by_run(run_id)
            .await?
            .into_iter()
            .filter(|i| !i.resolved)
            .collect())
    }

    async fn delete(&self, interrupt_id: &str) -> Result<()> {
        self.interrupts
            .write()
            .await
            .remove(interrupt_id)
            .map(|_| ())
            .ok_or_else(|| DomainError::not_found("interrupt", interrupt_id))
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryThreadRepository {
    threads: Arc<RwLock<HashMap<String, Thread>>>,
}

impl InMemoryThreadRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThreadRepository for InMemoryThreadRepository {
    async fn save(&self, thread: &Thread) -> Result<()> {
        let mut stored = thread.clone();
        stored.take_events();
        self.threads.write().await.insert(stored.id.clone(), stored);
        Ok(())
    }

    async fn find_by_id(&self, thread_id: &str) -> Result<Thread> {
        self.threads
            .read()
            .await
            .get(thread_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("thread", thread_id))
    }

    async fn exists(&self, thread_id: &str) -> Result<bool> {
        Ok(self.threads.read().await.contains_key(thread_id))
    }

    async fn delete(&self, thread_id: &str) -> Result<()> {
        self.threads
            .write()
            .await
            .remove(thread_id)
            .map(|_| ())
            .ok_or_else(|| DomainError::not_found("thread", thread_id))
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryAssistantRepository {
    assistants: Arc<RwLock<HashMap<String, Assistant>>>,
}

impl InMemoryAssistantRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AssistantRepository for InMemoryAssistantRepository {
    async fn save(&self, assistant: &Assistant) -> Result<()> {
        self.assistants
            .write()
            .await
            .insert(assistant.id.clone(), assistant.clone());
        Ok(())
    }

    async fn find_by_id(&self, assistant_id: &str) -> Result<Assistant> {
        self.assistants
            .read()
            .await
            .get(assistant_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("assistant", assistant_id))
    }

    async fn list(&self) -> Result<Vec<Assistant>> {
        let mut all: Vec<Assistant> = self.assistants.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryGraphRepository {
    graphs: Arc<RwLock<HashMap<String, Graph>>>,
}

impl InMemoryGraphRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphRepository for InMemoryGraphRepository {
    async fn save(&self, graph: &Graph) -> Result<()> {
        graph.validate()?;
        self.graphs
            .write()
            .await
            .insert(graph.id.clone(), graph.clone());
        Ok(())
    }

    async fn find_by_id(&self, graph_id: &str) -> Result<Graph> {
        self.graphs
            .read()
            .await
            .get(graph_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("graph", graph_id))
    }

    async fn find_by_assistant(&self, assistant_id: &str) -> Result<Graph> {
        self.graphs
            .read()
            .await
            .values()
            .filter(|g| g.assistant_id == assistant_id)
            .max_by(|a, b| a.created_at.cmp(&b.created_at))
            .cloned()
            .ok_or_else(|| DomainError::not_found("graph for assistant", assistant_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::GraphResolver;
    use crate::humanloop::InterruptReason;
    use crate::repository::RepositoryGraphResolver;
    use crate::run::NewRun;
    use crate::StateMap;
    use serde_json::json;

    #[tokio::test]
    async fn test_run_save_detects_lost_update() {
        let repo = InMemoryRunRepository::new();
        let mut run = Run::create(NewRun::new("t", "a")).unwrap();
        repo.save(&run).await.unwrap();
        run.take_events();

        let mut first = repo.find_by_id(&run.id).await.unwrap();
        let mut second = repo.find_by_id(&run.id).await.unwrap();

        first.start().unwrap();
        repo.save(&first).await.unwrap();

        second.cancel("user").unwrap();
        let err = repo.save(&second).await.unwrap_err();
        assert!(err.is_conflict());

        let stored = repo.find_by_id(&run.id).await.unwrap();
        assert_eq!(stored.status, crate::run::RunStatus::InProgress);
    }

    #[tokio::test]
    async fn test_active_run_lookup() {
        let repo = InMemoryRunRepository::new();
        let mut done = Run::create(NewRun::new("t", "a")).unwrap();
        done.start().unwrap();
        done.complete(StateMap::new()).unwrap();
        repo.save(&done).await.unwrap();

        assert!(repo.find_active_by_thread("t").await.unwrap().is_none());

        let live = Run::create(NewRun::new("t", "a")).unwrap();
        repo.save(&live).await.unwrap();
        let active = repo.find_active_by_thread("t").await.unwrap().unwrap();
        assert_eq!(active.id, live.id);
        assert_eq!(repo.find_by_thread("t").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_single_unresolved_interrupt_per_run() {
        let repo = InMemoryInterruptRepository::new();
        let mut first =
            Interrupt::new("run-1", "n1", InterruptReason::ToolCall, StateMap::new(), vec![]).unwrap();
        repo.save(&first).await.unwrap();

        let second =
            Interrupt::new("run-1", "n2", InterruptReason::ToolCall, StateMap::new(), vec![]).unwrap();
        let err = repo.save(&second).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidState { .. }));
        assert!(err.to_string().contains(&first.id));
        assert!(!err.to_string().contains("requires_action"));

        first.resolve(vec![]).unwrap();
        repo.save(&first).await.unwrap();
        repo.save(&second).await.unwrap();
        assert_eq!(repo.find_unresolved_by_run("run-1").await.unwrap().len(), 1);
        assert_eq!(repo.find_by_run("run-1").await.unwrap().len(), 2);

        repo.delete(&second.id).await.unwrap();
        assert!(repo.find_unresolved_by_run("run-1").await.unwrap().is_empty());
        assert!(repo.delete(&second.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_resolver_falls_back_to_assistant() {
        let repo = Arc::new(InMemoryGraphRepository::new());
        let graph = Graph::from_value(
            "asst-1",
            json!({
                "id": "g-1",
                "nodes": [{"id": "s", "type": "start"}, {"id": "e", "type": "end"}],
                "edges": [{"source": "s", "target": "e"}]
            }),
        )
        .unwrap();
        repo.save(&graph).await.unwrap();

        let resolver = RepositoryGraphResolver::new(repo);
        assert_eq!(resolver.resolve_graph("g-1").await.unwrap().id, "g-1");
        assert_eq!(resolver.resolve_graph("asst-1").await.unwrap().id, "g-1");
        assert!(resolver.resolve_graph("nope").await.unwrap_err().is_not_found());
    }
}
