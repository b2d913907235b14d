//! Run lifecycle through the services
//!
//! Runs execute locally on spawned tasks; the tests wait on them the same way
//! `/runs/wait` does.

use duragraph_checkpoint::InMemoryCheckpointStore;
use duragraph_core::error::DomainError;
use duragraph_core::events::{EventSink, RecordingEventSink};
use duragraph_core::execution::{EngineConfig, ExecutorRegistry, GraphEngine};
use duragraph_core::graph::GraphDefinition;
use duragraph_core::repository::{RepositoryGraphResolver, RunRepository};
use duragraph_core::run::{MultitaskStrategy, NewRun, Run, RunStatus};
use duragraph_core::StateMap;
use duragraph_server::services::{
    AssistantService, CreateAssistant, Repositories, RunService, ThreadService, WaitSettings,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

struct Harness {
    repos: Repositories,
    runs: RunService,
    threads: ThreadService,
    assistants: AssistantService,
    sink: RecordingEventSink,
}

impl Harness {
    fn new() -> Self {
        let repos = Repositories::in_memory();
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let sink = RecordingEventSink::new();
        let events: Arc<dyn EventSink> = Arc::new(sink.clone());

        let config = EngineConfig::default();
        let engine = GraphEngine::with_registry(
            config,
            ExecutorRegistry::with_defaults(config.max_subgraph_depth)
                .with_graph_resolver(Arc::new(RepositoryGraphResolver::new(repos.graphs.clone()))),
        );
        let runs = RunService::new(repos.clone(), checkpoints.clone(), engine, events.clone())
            .with_wait_settings(WaitSettings {
                timeout: Duration::from_secs(5),
                poll_interval: Duration::from_millis(5),
            });

        Self {
            threads: ThreadService::new(repos.clone(), checkpoints, events),
            assistants: AssistantService::new(repos.clone()),
            repos,
            runs,
            sink,
        }
    }

    async fn assistant(&self, id: &str, graph: Value) {
        let graph: GraphDefinition = serde_json::from_value(graph).unwrap();
        self.assistants
            .create(CreateAssistant {
                assistant_id: Some(id.to_string()),
                name: id.to_string(),
                graph: Some(graph),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    async fn thread(&self) -> String {
        self.threads.create_thread(StateMap::new()).await.unwrap().id
    }
}

fn map(value: Value) -> StateMap {
    value.as_object().cloned().unwrap_or_default()
}

fn chat_graph() -> Value {
    json!({
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "answer", "type": "llm", "config": {"model": "gpt-4o-mini"}},
            {"id": "end", "type": "end"}
        ],
        "edges": [
            {"source": "start", "target": "answer"},
            {"source": "answer", "target": "end"}
        ]
    })
}

fn approval_graph() -> Value {
    json!({
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "approve", "type": "human", "config": {"reason": "approval required"}},
            {"id": "end", "type": "end"}
        ],
        "edges": [
            {"source": "start", "target": "approve"},
            {"source": "approve", "target": "end"}
        ]
    })
}

#[tokio::test]
async fn test_llm_run_completes_once() {
    let h = Harness::new();
    h.assistant("chat", chat_graph()).await;
    let thread_id = h.thread().await;

    let run = h
        .runs
        .create_and_wait_for_run(
            NewRun::new(&thread_id, "chat").with_input(map(json!({"question": "hi"}))),
            WAIT,
        )
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.output["question"], json!("hi"));
    assert_eq!(run.output["response"], json!("LLM response placeholder"));
    assert_eq!(h.sink.count("run.completed"), 1);
    assert_eq!(h.sink.count("run.started"), 1);

    let state = h.threads.get_state(&thread_id, None).await.unwrap();
    assert_eq!(state.values["response"], json!("LLM response placeholder"));
    assert!(state.next.is_empty());
}

#[tokio::test]
async fn test_human_node_pauses_then_resumes_to_completion() {
    let h = Harness::new();
    h.assistant("review", approval_graph()).await;
    let thread_id = h.thread().await;

    let paused = h
        .runs
        .create_and_wait_for_run(NewRun::new(&thread_id, "review"), WAIT)
        .await
        .unwrap();
    assert_eq!(paused.status, RunStatus::RequiresAction);
    assert_eq!(h.sink.count("interrupt.created"), 1);

    let state = h.threads.get_state(&thread_id, None).await.unwrap();
    assert_eq!(state.next, vec!["approve".to_string()]);

    let resumed = h
        .runs
        .resume_run_with_input(&paused.id, map(json!({"approved": true})))
        .await
        .unwrap();
    assert_eq!(resumed.status, RunStatus::InProgress);

    let done = h.runs.wait_for_run(&paused.id, WAIT).await.unwrap();
    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.output["approved"], json!(true));
    assert_eq!(h.sink.count("interrupt.created"), 1);
    assert_eq!(h.sink.count("interrupt.resolved"), 1);
    assert_eq!(h.sink.count("run.resumed"), 1);
    assert_eq!(h.sink.count("run.completed"), 1);
}

#[tokio::test]
async fn test_state_edit_before_resume_reaches_output() {
    let h = Harness::new();
    h.assistant("review", approval_graph()).await;
    let thread_id = h.thread().await;

    let paused = h
        .runs
        .create_and_wait_for_run(NewRun::new(&thread_id, "review"), WAIT)
        .await
        .unwrap();

    let edited = h
        .runs
        .update_state_before_resume(&paused.id, map(json!({"note": "checked by ops"})))
        .await
        .unwrap();
    assert_eq!(edited.values["note"], json!("checked by ops"));

    h.runs
        .resume_run_with_input(&paused.id, StateMap::new())
        .await
        .unwrap();
    let done = h.runs.wait_for_run(&paused.id, WAIT).await.unwrap();
    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.output["note"], json!("checked by ops"));
}

#[tokio::test]
async fn test_resume_without_interrupt_leaves_status() {
    let h = Harness::new();
    h.assistant("chat", chat_graph()).await;
    let thread_id = h.thread().await;

    // paused without a stored interrupt
    let mut run = Run::create(NewRun::new(&thread_id, "chat")).unwrap();
    run.start().unwrap();
    run.requires_action("int-missing", "lost", Vec::new()).unwrap();
    h.repos.runs.save(&run).await.unwrap();

    let err = h
        .runs
        .resume_run_with_input(&run.id, StateMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidState { .. }));

    let reloaded = h.runs.get_run(&thread_id, &run.id).await.unwrap();
    assert_eq!(reloaded.status, RunStatus::RequiresAction);
}

#[tokio::test]
async fn test_resume_of_finished_run_is_invalid_state() {
    let h = Harness::new();
    h.assistant("chat", chat_graph()).await;
    let thread_id = h.thread().await;

    let run = h
        .runs
        .create_and_wait_for_run(NewRun::new(&thread_id, "chat"), WAIT)
        .await
        .unwrap();
    let err = h
        .runs
        .submit_tool_outputs(&run.id, vec![json!({"output": "late"})])
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidState { .. }));
}

#[tokio::test]
async fn test_reject_strategy_refuses_second_run() {
    let h = Harness::new();
    h.assistant("review", approval_graph()).await;
    let thread_id = h.thread().await;

    let first = h
        .runs
        .create_and_wait_for_run(NewRun::new(&thread_id, "review"), WAIT)
        .await
        .unwrap();
    assert_eq!(first.status, RunStatus::RequiresAction);

    let err = h
        .runs
        .create_run(
            NewRun::new(&thread_id, "review").with_multitask_strategy(MultitaskStrategy::Reject),
        )
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(h.runs.list_runs(&thread_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_interrupt_strategy_cancels_paused_run() {
    let h = Harness::new();
    h.assistant("review", approval_graph()).await;
    let thread_id = h.thread().await;

    let first = h
        .runs
        .create_and_wait_for_run(NewRun::new(&thread_id, "review"), WAIT)
        .await
        .unwrap();

    let second = h
        .runs
        .create_run(
            NewRun::new(&thread_id, "review")
                .with_multitask_strategy(MultitaskStrategy::Interrupt),
        )
        .await
        .unwrap();

    let first = h.runs.get_run(&thread_id, &first.id).await.unwrap();
    assert_eq!(first.status, RunStatus::Cancelled);
    assert_eq!(second.status, RunStatus::Queued);
}

#[tokio::test]
async fn test_cancel_paused_run() {
    let h = Harness::new();
    h.assistant("review", approval_graph()).await;
    let thread_id = h.thread().await;

    let paused = h
        .runs
        .create_and_wait_for_run(NewRun::new(&thread_id, "review"), WAIT)
        .await
        .unwrap();
    let cancelled = h.runs.cancel_run(&paused.id, "cancelled by user").await.unwrap();
    assert_eq!(cancelled.status, RunStatus::Cancelled);

    let err = h
        .runs
        .resume_run_with_input(&paused.id, StateMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidState { .. }));
    assert_eq!(h.sink.count("run.cancelled"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_wait_gives_up_with_timeout() {
    let h = Harness::new();
    h.assistant("chat", chat_graph()).await;
    let thread_id = h.thread().await;

    // created but never started
    let run = h.runs.create_run(NewRun::new(&thread_id, "chat")).await.unwrap();
    let err = h
        .runs
        .wait_for_run(&run.id, Some(Duration::from_secs(2)))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Timeout { .. }));

    let run = h.runs.get_run(&thread_id, &run.id).await.unwrap();
    assert_eq!(run.status, RunStatus::Queued);
}
