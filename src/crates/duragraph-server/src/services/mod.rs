//! Application services
//!
//! The services own the workflows that span several aggregates: creating and
//! executing runs, pausing and resuming them, handing them to workers and
//! managing thread state. They hold no rules of their own beyond sequencing;
//! every transition goes through the aggregates in `duragraph-core`.

pub mod assistant;
pub mod run;
pub mod thread;
pub mod worker;

pub use assistant::{AssistantService, CreateAssistant};
pub use run::{RunService, WaitSettings};
pub use thread::ThreadService;
pub use worker::{RunStatusUpdate, WorkerService};

use duragraph_core::assistant::Assistant;
use duragraph_core::error::{DomainError, Result};
use duragraph_core::events::{DomainEvent, EventSink};
use duragraph_core::execution::GraphResolver;
use duragraph_core::graph::Graph;
use duragraph_core::repository::{
    AssistantRepository, GraphRepository, InMemoryAssistantRepository, InMemoryGraphRepository,
    InMemoryInterruptRepository, InMemoryRunRepository, InMemoryThreadRepository,
    InterruptRepository, RepositoryGraphResolver, RunRepository, ThreadRepository,
};
use duragraph_core::run::Run;
use std::sync::Arc;

/// Attempts made for a run transition that keeps losing the version race
pub const MAX_TRANSITION_ATTEMPTS: usize = 3;

/// The repositories shared by every service
#[derive(Clone)]
pub struct Repositories {
    pub runs: Arc<dyn RunRepository>,
    pub interrupts: Arc<dyn InterruptRepository>,
    pub threads: Arc<dyn ThreadRepository>,
    pub assistants: Arc<dyn AssistantRepository>,
    pub graphs: Arc<dyn GraphRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            runs: Arc::new(InMemoryRunRepository::new()),
            interrupts: Arc::new(InMemoryInterruptRepository::new()),
            threads: Arc::new(InMemoryThreadRepository::new()),
            assistants: Arc::new(InMemoryAssistantRepository::new()),
            graphs: Arc::new(InMemoryGraphRepository::new()),
        }
    }
}

/// Load a run, apply `transition`, save it and publish what it recorded
///
/// A save that loses the version check reloads the run and applies the
/// transition again, so `transition` must be safe to call more than once.
pub(crate) async fn transition_run<F>(
    runs: &dyn RunRepository,
    events: &dyn EventSink,
    run_id: &str,
    mut transition: F,
) -> Result<Run>
where
    F: FnMut(&mut Run) -> Result<()> + Send,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut run = runs.find_by_id(run_id).await?;
        transition(&mut run)?;

        match runs.save(&run).await {
            Ok(()) => {
                publish_run_events(events, &mut run);
                return Ok(run);
            }
            Err(err) if err.is_conflict() && attempt < MAX_TRANSITION_ATTEMPTS => {
                tracing::debug!(run_id, attempt, "run save raced, reloading");
            }
            Err(err) => return Err(err),
        }
    }
}

pub(crate) fn publish_run_events(events: &dyn EventSink, run: &mut Run) {
    events.publish_all(run.take_events().into_iter().map(DomainEvent::from).collect());
}

/// Graph an assistant executes
///
/// Looks up `metadata.graph_id` (or the assistant id) as a graph id, then
/// the latest graph stored for the assistant.
pub(crate) async fn resolve_assistant_graph(
    graphs: &Arc<dyn GraphRepository>,
    assistant: &Assistant,
) -> Result<Graph> {
    let resolver = RepositoryGraphResolver::new(graphs.clone());
    match resolver.resolve_graph(assistant.graph_id()).await {
        Ok(graph) => Ok(graph),
        Err(err) if err.is_not_found() => graphs
            .find_by_assistant(&assistant.id)
            .await
            .map_err(|_| {
                DomainError::configuration(format!(
                    "no graph defined for assistant {}",
                    assistant.id
                ))
            }),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duragraph_core::events::RecordingEventSink;
    use duragraph_core::run::{NewRun, RunStatus};

    #[tokio::test]
    async fn test_transition_saves_and_publishes() {
        let repos = Repositories::in_memory();
        let sink = RecordingEventSink::new();
        let mut run = Run::create(NewRun::new("t-1", "a-1")).unwrap();
        repos.runs.save(&run).await.unwrap();
        run.take_events();

        let started = transition_run(repos.runs.as_ref(), &sink, &run.id, |r| r.start())
            .await
            .unwrap();

        assert_eq!(started.status, RunStatus::InProgress);
        assert_eq!(sink.event_types(), vec!["run.started"]);
        assert_eq!(
            repos.runs.find_by_id(&run.id).await.unwrap().status,
            RunStatus::InProgress
        );
    }

    #[tokio::test]
    async fn test_rejected_transition_publishes_nothing() {
        let repos = Repositories::in_memory();
        let sink = RecordingEventSink::new();
        let run = Run::create(NewRun::new("t-1", "a-1")).unwrap();
        repos.runs.save(&run).await.unwrap();

        let err = transition_run(repos.runs.as_ref(), &sink, &run.id, |r| {
            r.complete(Default::default())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, DomainError::InvalidState { .. }));
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_missing_graph_is_configuration_error() {
        let repos = Repositories::in_memory();
        let assistant = Assistant::new("empty").unwrap();

        let err = resolve_assistant_graph(&repos.graphs, &assistant)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Configuration(_)));
    }
}
