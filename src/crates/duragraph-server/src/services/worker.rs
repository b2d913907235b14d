//! Pull-model dispatch to external workers
//!
//! A run handed to a worker becomes a [`WorkerTask`] in the worker's queue.
//! The worker drains it with [`WorkerService::poll_tasks`] and reports progress
//! through [`WorkerService::handle_event`], which drives the same run
//! transitions local execution uses.

use crate::services::transition_run;
use chrono::Utc;
use dashmap::DashMap;
use duragraph_core::assistant::Assistant;
use duragraph_core::error::{DomainError, Result};
use duragraph_core::events::{DomainEvent, EventSink};
use duragraph_core::humanloop::{Interrupt, InterruptReason};
use duragraph_core::repository::{InterruptRepository, RunRepository};
use duragraph_core::run::{Run, RunStatus};
use duragraph_core::worker::{
    TaskQueue, Worker, WorkerEvent, WorkerGraphDefinition, WorkerHeartbeat, WorkerRegistry,
    WorkerReport, WorkerTask,
};
use duragraph_core::StateMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Result of a run reported by a worker
#[derive(Debug, Clone, Default)]
pub struct RunStatusUpdate {
    pub output: StateMap,
    pub error: Option<String>,
    /// Node that paused, for `interrupted`
    pub node_id: Option<String>,
}

impl RunStatusUpdate {
    /// Split a worker event's `data` into output and error
    ///
    /// `data.output` (or `data` itself when it has no `output` key) is the
    /// output; `data.error` is the error message.
    pub fn from_event_data(data: &Value, node_id: Option<String>) -> Self {
        let output = match data.get("output") {
            Some(Value::Object(output)) => output.clone(),
            Some(_) => StateMap::new(),
            None => data.as_object().cloned().unwrap_or_default(),
        };
        let error = data.get("error").and_then(Value::as_str).map(str::to_string);
        Self {
            output,
            error,
            node_id,
        }
    }
}

#[derive(Clone)]
pub struct WorkerService {
    registry: Arc<WorkerRegistry>,
    queue: Arc<TaskQueue>,
    runs: Arc<dyn RunRepository>,
    interrupts: Arc<dyn InterruptRepository>,
    events: Arc<dyn EventSink>,
    heartbeat_threshold: Duration,
    /// run id -> worker id for runs handed to a worker
    assignments: Arc<DashMap<String, String>>,
}

impl WorkerService {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        queue: TaskQueue,
        runs: Arc<dyn RunRepository>,
        interrupts: Arc<dyn InterruptRepository>,
        events: Arc<dyn EventSink>,
        heartbeat_threshold: Duration,
    ) -> Self {
        Self {
            registry,
            queue: Arc::new(queue),
            runs,
            interrupts,
            events,
            heartbeat_threshold,
            assignments: Arc::new(DashMap::new()),
        }
    }

    pub fn heartbeat_threshold(&self) -> Duration {
        self.heartbeat_threshold
    }

    pub fn register(&self, worker: Worker) -> Result<Worker> {
        let worker = self.registry.register(worker)?;
        tracing::info!(
            worker_id = %worker.id,
            graphs = ?worker.capabilities.graphs,
            "worker registered"
        );
        self.events.publish(
            WorkerEvent::Registered {
                worker_id: worker.id.clone(),
                graphs: worker.capabilities.graphs.clone(),
                occurred_at: Utc::now(),
            }
            .into(),
        );
        Ok(worker)
    }

    /// Remove a worker; tasks it never polled move to another worker if one
    /// can take them
    pub fn deregister(&self, worker_id: &str) -> bool {
        if !self.registry.deregister(worker_id) {
            return false;
        }

        for task in self.queue.remove_worker(worker_id) {
            self.assignments.remove(&task.run_id);
            match self
                .registry
                .find_worker_for_graph(&task.graph_id, self.heartbeat_threshold)
            {
                Some(worker) => {
                    tracing::info!(
                        run_id = %task.run_id,
                        from = worker_id,
                        to = %worker.id,
                        "moving unpolled task"
                    );
                    self.assignments.insert(task.run_id.clone(), worker.id.clone());
                    self.queue.push(&worker.id, task);
                }
                None => tracing::warn!(
                    run_id = %task.run_id,
                    worker_id,
                    "dropping unpolled task of deregistered worker"
                ),
            }
        }

        tracing::info!(worker_id, "worker deregistered");
        self.events.publish(
            WorkerEvent::Deregistered {
                worker_id: worker_id.to_string(),
                occurred_at: Utc::now(),
            }
            .into(),
        );
        true
    }

    pub fn heartbeat(&self, worker_id: &str, beat: WorkerHeartbeat) -> Result<()> {
        self.registry.heartbeat(worker_id, beat)?;
        tracing::debug!(worker_id, active_runs = beat.active_runs, "heartbeat");
        Ok(())
    }

    pub fn get_worker(&self, worker_id: &str) -> Result<Worker> {
        self.registry
            .get(worker_id)
            .ok_or_else(|| DomainError::not_found("worker", worker_id))
    }

    pub fn list_workers(&self, healthy_only: bool) -> Vec<Worker> {
        if healthy_only {
            self.registry.healthy_workers(self.heartbeat_threshold)
        } else {
            self.registry.all_workers()
        }
    }

    pub fn has_workers(&self) -> bool {
        !self.registry.is_empty()
    }

    pub fn has_healthy_worker_for_graph(&self, graph_id: &str) -> bool {
        self.registry
            .find_worker_for_graph(graph_id, self.heartbeat_threshold)
            .is_some()
    }

    pub fn graph_definition(&self, graph_id: &str) -> Result<WorkerGraphDefinition> {
        self.registry
            .graph_definition(graph_id)
            .ok_or_else(|| DomainError::not_found("graph", graph_id))
    }

    /// Worker a run was handed to, if any
    pub fn assigned_worker(&self, run_id: &str) -> Option<String> {
        self.assignments.get(run_id).map(|w| w.value().clone())
    }

    /// Queue `run` for a healthy worker that advertises the assistant's graph
    ///
    /// Returns the chosen worker id, or `None` when no worker can take it.
    pub fn dispatch_run(&self, run: &Run, assistant: &Assistant) -> Result<Option<String>> {
        let graph_id = assistant.graph_id();
        let Some(worker) = self
            .registry
            .find_worker_for_graph(graph_id, self.heartbeat_threshold)
        else {
            tracing::debug!(run_id = %run.id, graph_id, "no worker available for graph");
            return Ok(None);
        };

        let task = WorkerTask {
            task_id: WorkerTask::task_id_for(&run.id),
            run_id: run.id.clone(),
            thread_id: run.thread_id.clone(),
            assistant_id: run.assistant_id.clone(),
            graph_id: graph_id.to_string(),
            input: run.input.clone(),
            config: run.config.clone(),
            created_at: Utc::now(),
        };
        let task_id = task.task_id.clone();
        self.queue.push(&worker.id, task);
        self.assignments.insert(run.id.clone(), worker.id.clone());

        tracing::info!(run_id = %run.id, worker_id = %worker.id, graph_id, "run dispatched to worker");
        self.events.publish(
            WorkerEvent::TaskDispatched {
                worker_id: worker.id.clone(),
                run_id: run.id.clone(),
                task_id,
                occurred_at: Utc::now(),
            }
            .into(),
        );
        Ok(Some(worker.id))
    }

    /// Hand out up to `max` pending tasks, bounded by the worker's free capacity
    ///
    /// `max <= 0` counts as 1. A worker at capacity gets nothing.
    pub fn poll_tasks(&self, worker_id: &str, max: i64) -> Result<Vec<WorkerTask>> {
        let worker = self.get_worker(worker_id)?;
        if !worker.has_capacity() {
            tracing::debug!(worker_id, "worker at capacity, no tasks handed out");
            return Ok(Vec::new());
        }

        let mut limit = usize::try_from(max).unwrap_or(0).max(1);
        let cap = worker.capabilities.max_concurrent_runs;
        if cap > 0 {
            limit = limit.min(cap.saturating_sub(worker.active_runs) as usize);
        }

        let tasks = self.queue.drain(worker_id, limit);
        for _ in &tasks {
            self.registry.adjust_active_runs(worker_id, true, false);
        }
        if !tasks.is_empty() {
            tracing::info!(worker_id, count = tasks.len(), "tasks polled");
        }
        Ok(tasks)
    }

    /// Apply a progress report from a worker to the run it names
    pub async fn handle_event(
        &self,
        worker_id: &str,
        run_id: &str,
        event_type: &str,
        node_id: Option<String>,
        data: Value,
    ) -> Result<Run> {
        self.get_worker(worker_id)?;
        let report: WorkerReport = event_type.parse()?;

        self.events.publish(
            WorkerEvent::RunReported {
                worker_id: worker_id.to_string(),
                run_id: run_id.to_string(),
                report,
                data: data.clone(),
                occurred_at: Utc::now(),
            }
            .into(),
        );

        let update = RunStatusUpdate::from_event_data(&data, node_id);
        self.update_run_status(run_id, report.run_status(), update).await
    }

    /// Map a reported status onto the matching run transition
    ///
    /// `running`/`in_progress` start the run and tolerate a run that already
    /// started. Unknown statuses are rejected.
    pub async fn update_run_status(
        &self,
        run_id: &str,
        status: &str,
        update: RunStatusUpdate,
    ) -> Result<Run> {
        let runs = self.runs.as_ref();
        let events = self.events.as_ref();

        let run = match status {
            "running" | "in_progress" => {
                match transition_run(runs, events, run_id, |r| r.start()).await {
                    Ok(run) => run,
                    Err(err) if err.is_not_found() => return Err(err),
                    Err(err) => {
                        tracing::debug!(run_id, error = %err, "ignoring start report");
                        runs.find_by_id(run_id).await?
                    }
                }
            }
            "success" | "completed" => {
                transition_run(runs, events, run_id, |r| r.complete(update.output.clone())).await?
            }
            "error" | "failed" => {
                let error = update
                    .error
                    .clone()
                    .unwrap_or_else(|| "worker reported failure".to_string());
                transition_run(runs, events, run_id, |r| r.fail(error.clone())).await?
            }
            "interrupted" | "requires_action" => self.interrupt(run_id, &update).await?,
            "cancelled" => {
                transition_run(runs, events, run_id, |r| r.cancel("cancelled by worker")).await?
            }
            other => {
                return Err(DomainError::invalid_input(
                    "status",
                    format!("unknown run status '{other}'"),
                ))
            }
        };

        if run.is_terminal() {
            if let Some((_, worker_id)) = self.assignments.remove(run_id) {
                let failed = status == "error" || status == "failed";
                self.registry.adjust_active_runs(&worker_id, false, failed);
            }
        }

        tracing::info!(run_id, status = %run.status, "run status updated from worker");
        Ok(run)
    }

    async fn interrupt(&self, run_id: &str, update: &RunStatusUpdate) -> Result<Run> {
        let node_id = update
            .node_id
            .clone()
            .or_else(|| {
                update
                    .output
                    .get("node_id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "worker".to_string());
        let tool_calls = update
            .output
            .get("tool_calls")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let reason = update
            .output
            .get("reason")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| update.error.clone())
            .unwrap_or_else(|| "interrupted by worker".to_string());

        let current = self.runs.find_by_id(run_id).await?;
        if !current.status.can_transition_to(RunStatus::RequiresAction) {
            return Err(DomainError::invalid_state(
                current.status.as_str(),
                "requires_action",
            ));
        }

        let mut interrupt = Interrupt::new(
            run_id,
            node_id,
            InterruptReason::ToolCall,
            update.output.clone(),
            tool_calls.clone(),
        )?;
        let created = interrupt.take_events();
        self.interrupts.save(&interrupt).await?;

        let run = match transition_run(self.runs.as_ref(), self.events.as_ref(), run_id, |r| {
            r.requires_action(&interrupt.id, &reason, tool_calls.clone())
        })
        .await
        {
            Ok(run) => run,
            Err(err) => {
                if let Err(cleanup) = self.interrupts.delete(&interrupt.id).await {
                    tracing::warn!(run_id, error = %cleanup, "failed to drop orphaned interrupt");
                }
                return Err(err);
            }
        };

        self.events
            .publish_all(created.into_iter().map(DomainEvent::from).collect());
        Ok(run)
    }

    /// Mark workers with stale heartbeats offline
    pub fn cleanup_stale_workers(&self) -> Vec<String> {
        let marked = self.registry.cleanup_stale_workers(self.heartbeat_threshold);
        for worker_id in &marked {
            tracing::warn!(worker_id = %worker_id, "worker heartbeat stale, marked offline");
            self.events.publish(
                WorkerEvent::MarkedOffline {
                    worker_id: worker_id.clone(),
                    occurred_at: Utc::now(),
                }
                .into(),
            );
        }
        marked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::Repositories;
    use duragraph_core::events::RecordingEventSink;
    use duragraph_core::run::{NewRun, RunStatus};
    use duragraph_core::worker::Capabilities;
    use serde_json::json;

    struct Fixture {
        service: WorkerService,
        repos: Repositories,
        sink: RecordingEventSink,
    }

    fn fixture() -> Fixture {
        let repos = Repositories::in_memory();
        let sink = RecordingEventSink::new();
        let service = WorkerService::new(
            Arc::new(WorkerRegistry::new()),
            TaskQueue::new(),
            repos.runs.clone(),
            repos.interrupts.clone(),
            Arc::new(sink.clone()),
            Duration::from_secs(30),
        );
        Fixture {
            service,
            repos,
            sink,
        }
    }

    fn worker(id: &str, graphs: &[&str], max: u32) -> Worker {
        Worker::new(
            id,
            id,
            Capabilities {
                graphs: graphs.iter().map(|g| g.to_string()).collect(),
                max_concurrent_runs: max,
            },
        )
    }

    async fn queued_run(repos: &Repositories) -> Run {
        let mut run = Run::create(NewRun::new("t-1", "support")).unwrap();
        repos.runs.save(&run).await.unwrap();
        run.take_events();
        run
    }

    #[tokio::test]
    async fn test_dispatch_and_poll_once() {
        let f = fixture();
        f.service.register(worker("w-1", &["support"], 0)).unwrap();
        let run = queued_run(&f.repos).await;
        let assistant = Assistant::with_id("support", "Support").unwrap();

        let chosen = f.service.dispatch_run(&run, &assistant).unwrap();
        assert_eq!(chosen.as_deref(), Some("w-1"));
        assert_eq!(f.service.assigned_worker(&run.id).as_deref(), Some("w-1"));

        let first = f.service.poll_tasks("w-1", 0).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].run_id, run.id);
        assert!(f.service.poll_tasks("w-1", 10).unwrap().is_empty());
        assert_eq!(f.sink.count("worker.task_dispatched"), 1);
    }

    #[tokio::test]
    async fn test_dispatch_without_matching_worker() {
        let f = fixture();
        f.service.register(worker("w-1", &["billing"], 0)).unwrap();
        let run = queued_run(&f.repos).await;
        let assistant = Assistant::with_id("support", "Support").unwrap();

        assert_eq!(f.service.dispatch_run(&run, &assistant).unwrap(), None);
        assert!(f.service.has_workers());
        assert!(!f.service.has_healthy_worker_for_graph("support"));
    }

    #[tokio::test]
    async fn test_poll_unknown_worker_is_not_found() {
        let f = fixture();
        assert!(f.service.poll_tasks("ghost", 1).unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_poll_respects_capacity() {
        let f = fixture();
        f.service.register(worker("w-1", &["support"], 1)).unwrap();
        let assistant = Assistant::with_id("support", "Support").unwrap();
        for _ in 0..2 {
            let run = queued_run(&f.repos).await;
            f.service.dispatch_run(&run, &assistant).unwrap();
        }

        assert_eq!(f.service.poll_tasks("w-1", 5).unwrap().len(), 1);
        assert!(f.service.poll_tasks("w-1", 5).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reports_drive_run_to_completion() {
        let f = fixture();
        f.service.register(worker("w-1", &["support"], 0)).unwrap();
        let run = queued_run(&f.repos).await;
        let assistant = Assistant::with_id("support", "Support").unwrap();
        f.service.dispatch_run(&run, &assistant).unwrap();
        f.service.poll_tasks("w-1", 1).unwrap();

        let started = f
            .service
            .handle_event("w-1", &run.id, "run_started", None, Value::Null)
            .await
            .unwrap();
        assert_eq!(started.status, RunStatus::InProgress);

        // a duplicate start report is tolerated
        f.service
            .handle_event("w-1", &run.id, "run_started", None, Value::Null)
            .await
            .unwrap();

        let done = f
            .service
            .handle_event(
                "w-1",
                &run.id,
                "run_completed",
                None,
                json!({"output": {"answer": 42}}),
            )
            .await
            .unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(done.output["answer"], json!(42));
        assert!(f.service.assigned_worker(&run.id).is_none());
        assert_eq!(f.service.get_worker("w-1").unwrap().active_runs, 0);
        assert_eq!(f.sink.count("run.completed"), 1);
    }

    #[tokio::test]
    async fn test_interrupted_report_creates_interrupt() {
        let f = fixture();
        let run = queued_run(&f.repos).await;
        f.service
            .update_run_status(&run.id, "running", RunStatusUpdate::default())
            .await
            .unwrap();

        let update = RunStatusUpdate::from_event_data(
            &json!({"reason": "needs approval", "tool_calls": [{"id": "c-1"}]}),
            Some("review".to_string()),
        );
        let paused = f
            .service
            .update_run_status(&run.id, "interrupted", update)
            .await
            .unwrap();

        assert_eq!(paused.status, RunStatus::RequiresAction);
        let pending = f.repos.interrupts.find_unresolved_by_run(&run.id).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].node_id, "review");
        assert_eq!(pending[0].tool_calls, vec![json!({"id": "c-1"})]);
    }

    #[tokio::test]
    async fn test_interrupted_report_on_queued_run_leaves_no_interrupt() {
        let f = fixture();
        let run = queued_run(&f.repos).await;
        let update = RunStatusUpdate::from_event_data(
            &json!({"reason": "too early"}),
            Some("review".to_string()),
        );

        let err = f
            .service
            .update_run_status(&run.id, "interrupted", update)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState { .. }));
        assert!(f.repos.interrupts.find_by_run(&run.id).await.unwrap().is_empty());
        assert_eq!(f.sink.count("interrupt.created"), 0);

        // a real pause after the run starts is still accepted
        f.service
            .update_run_status(&run.id, "running", RunStatusUpdate::default())
            .await
            .unwrap();
        let update = RunStatusUpdate::from_event_data(
            &json!({"reason": "needs approval"}),
            Some("review".to_string()),
        );
        let paused = f
            .service
            .update_run_status(&run.id, "interrupted", update)
            .await
            .unwrap();
        assert_eq!(paused.status, RunStatus::RequiresAction);
        assert_eq!(
            f.repos.interrupts.find_unresolved_by_run(&run.id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_interrupted_report_on_finished_run_leaves_no_interrupt() {
        let f = fixture();
        let run = queued_run(&f.repos).await;
        f.service
            .update_run_status(&run.id, "cancelled", RunStatusUpdate::default())
            .await
            .unwrap();

        let err = f
            .service
            .update_run_status(&run.id, "interrupted", RunStatusUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState { .. }));
        assert!(f.repos.interrupts.find_by_run(&run.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_status_is_invalid_input() {
        let f = fixture();
        let run = queued_run(&f.repos).await;
        let err = f
            .service
            .update_run_status(&run.id, "exploded", RunStatusUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidInput { .. }));
        assert_eq!(
            f.repos.runs.find_by_id(&run.id).await.unwrap().status,
            RunStatus::Queued
        );
    }

    #[tokio::test]
    async fn test_unknown_event_type_is_rejected() {
        let f = fixture();
        f.service.register(worker("w-1", &["support"], 0)).unwrap();
        let run = queued_run(&f.repos).await;
        let err = f
            .service
            .handle_event("w-1", &run.id, "run_exploded", None, Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_deregister_moves_unpolled_tasks() {
        let f = fixture();
        f.service.register(worker("w-1", &["support"], 0)).unwrap();
        let run = queued_run(&f.repos).await;
        let assistant = Assistant::with_id("support", "Support").unwrap();
        f.service.dispatch_run(&run, &assistant).unwrap();
        f.service.register(worker("w-2", &["support"], 0)).unwrap();

        assert!(f.service.deregister("w-1"));
        assert!(!f.service.deregister("w-1"));
        assert_eq!(f.service.assigned_worker(&run.id).as_deref(), Some("w-2"));
        assert_eq!(f.service.poll_tasks("w-2", 1).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_marks_stale_workers_offline() {
        let repos = Repositories::in_memory();
        let sink = RecordingEventSink::new();
        let service = WorkerService::new(
            Arc::new(WorkerRegistry::new()),
            TaskQueue::new(),
            repos.runs.clone(),
            repos.interrupts.clone(),
            Arc::new(sink.clone()),
            Duration::ZERO,
        );
        service.register(worker("w-1", &["support"], 0)).unwrap();

        assert_eq!(service.cleanup_stale_workers(), vec!["w-1".to_string()]);
        assert!(service.list_workers(true).is_empty());
        assert_eq!(service.list_workers(false).len(), 1);
        assert_eq!(sink.count("worker.offline"), 1);
    }
}
