//! Run orchestration
//!
//! [`RunService`] creates runs, applies the thread's multitask policy, hands
//! runs to a worker or executes them on a background task, and turns the
//! engine's outcome into the matching run transition:
//!
//! | Outcome | Effect |
//! |---------|--------|
//! | completed | checkpoint with the output, `run.completed` |
//! | interrupted | interrupt saved, `run.requires_action`, checkpoint naming the paused node |
//! | cancelled | `run.cancelled` unless the run already is |
//! | any other error | `run.failed` with the error text |
//!
//! Resuming resolves the run's single outstanding interrupt and re-enters the
//! engine from the snapshot stored on it.

use crate::services::worker::WorkerService;
use crate::services::{resolve_assistant_graph, transition_run, Repositories};
use dashmap::DashMap;
use duragraph_checkpoint::{state, CheckpointStore, ThreadState};
use duragraph_core::error::{DomainError, Result};
use duragraph_core::events::{DomainEvent, EventSink};
use duragraph_core::execution::{
    Cancellation, ExecutionContext, ExecutionOutcome, ExecutionState, GraphEngine,
    InterruptSignal, ResumeFrom, ResumeSnapshot,
};
use duragraph_core::graph::Graph;
use duragraph_core::humanloop::Interrupt;
use duragraph_core::run::{MultitaskDecision, MultitaskStrategy, NewRun, Run, RunStatus};
use duragraph_core::StateMap;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Run config keys copied into the initial graph state
const GATE_KEYS: [&str; 2] = ["interrupt_before", "interrupt_after"];

/// Namespace of the root graph's checkpoints
const ROOT_NAMESPACE: &str = "";

/// How [`RunService::wait_for_run`] polls
#[derive(Debug, Clone, Copy)]
pub struct WaitSettings {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            poll_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Clone)]
pub struct RunService {
    repos: Repositories,
    checkpoints: Arc<dyn CheckpointStore>,
    engine: GraphEngine,
    events: Arc<dyn EventSink>,
    workers: Option<WorkerService>,
    cancellations: Arc<DashMap<String, Cancellation>>,
    wait: WaitSettings,
}

impl RunService {
    pub fn new(
        repos: Repositories,
        checkpoints: Arc<dyn CheckpointStore>,
        engine: GraphEngine,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            repos,
            checkpoints,
            engine,
            events,
            workers: None,
            cancellations: Arc::new(DashMap::new()),
            wait: WaitSettings::default(),
        }
    }

    /// Offer runs to registered workers before executing them locally
    pub fn with_workers(mut self, workers: WorkerService) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_wait_settings(mut self, wait: WaitSettings) -> Self {
        self.wait = wait;
        self
    }

    /// Create a queued run after applying the multitask strategy
    pub async fn create_run(&self, params: NewRun) -> Result<Run> {
        if !self.repos.threads.exists(&params.thread_id).await? {
            return Err(DomainError::not_found("thread", &params.thread_id));
        }
        self.repos.assistants.find_by_id(&params.assistant_id).await?;
        self.check_multitask_strategy(&params.thread_id, params.multitask_strategy)
            .await?;

        let mut run = Run::create(params)?;
        self.repos.runs.save(&run).await?;
        self.publish(run.take_events().into_iter().map(DomainEvent::from));

        tracing::info!(
            run_id = %run.id,
            thread_id = %run.thread_id,
            assistant_id = %run.assistant_id,
            "run created"
        );
        Ok(run)
    }

    /// Cancel, reject or allow given the thread's active run
    pub async fn check_multitask_strategy(
        &self,
        thread_id: &str,
        strategy: MultitaskStrategy,
    ) -> Result<()> {
        let active = self.repos.runs.find_active_by_thread(thread_id).await?;
        match strategy.decide(active.as_ref().map(|r| r.id.as_str())) {
            MultitaskDecision::Proceed => Ok(()),
            MultitaskDecision::CancelExisting(run_id) => {
                tracing::info!(thread_id, run_id = %run_id, strategy = %strategy, "cancelling active run");
                if let Err(err) = self
                    .cancel_run(&run_id, &format!("superseded by a new run ({strategy})"))
                    .await
                {
                    tracing::warn!(run_id = %run_id, error = %err, "could not cancel active run");
                }
                Ok(())
            }
            MultitaskDecision::Reject(run_id) => Err(DomainError::Conflict(format!(
                "thread {thread_id} already has active run {run_id}"
            ))),
        }
    }

    /// Hand the run to a worker, or execute it on a background task
    pub async fn start_run(&self, run_id: &str) -> Result<()> {
        let run = self.repos.runs.find_by_id(run_id).await?;
        if self.try_dispatch(&run).await {
            return Ok(());
        }

        let service = self.clone();
        let run_id = run_id.to_string();
        tokio::spawn(async move {
            if let Err(err) = service.execute_run(&run_id).await {
                tracing::error!(run_id = %run_id, error = %err, "run execution failed");
            }
        });
        Ok(())
    }

    async fn try_dispatch(&self, run: &Run) -> bool {
        let Some(workers) = &self.workers else {
            return false;
        };
        let assistant = match self.repos.assistants.find_by_id(&run.assistant_id).await {
            Ok(assistant) => assistant,
            Err(err) => {
                tracing::warn!(run_id = %run.id, error = %err, "cannot dispatch run");
                return false;
            }
        };
        match workers.dispatch_run(run, &assistant) {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(err) => {
                tracing::warn!(run_id = %run.id, error = %err, "dispatch failed, executing locally");
                false
            }
        }
    }

    /// Start the run and drive its graph to an outcome on this task
    pub async fn execute_run(&self, run_id: &str) -> Result<()> {
        let cancellation = self.track(run_id);
        let result = self.execute_tracked(run_id, cancellation).await;
        self.cancellations.remove(run_id);
        result
    }

    async fn execute_tracked(&self, run_id: &str, cancellation: Cancellation) -> Result<()> {
        let run = transition_run(self.repos.runs.as_ref(), self.events.as_ref(), run_id, |r| {
            r.start()
        })
        .await?;
        tracing::info!(run_id, thread_id = %run.thread_id, "run started");

        let outcome = match self.load_graph(&run).await {
            Ok(graph) => {
                let ctx = self.context(&run, cancellation);
                let state = ExecutionState::new(&run.id, initial_state(&run));
                self.engine.execute_state(&ctx, &graph, state).await
            }
            Err(err) => Err(err),
        };
        self.settle(&run, outcome).await
    }

    async fn load_graph(&self, run: &Run) -> Result<Graph> {
        let assistant = self.repos.assistants.find_by_id(&run.assistant_id).await?;
        resolve_assistant_graph(&self.repos.graphs, &assistant).await
    }

    fn context(&self, run: &Run, cancellation: Cancellation) -> ExecutionContext {
        ExecutionContext::new(&run.id, &run.thread_id)
            .with_config(run.config.clone())
            .with_cancellation(cancellation)
            .with_event_sink(self.events.clone())
    }

    fn track(&self, run_id: &str) -> Cancellation {
        let cancellation = Cancellation::new();
        self.cancellations
            .insert(run_id.to_string(), cancellation.clone());
        cancellation
    }

    /// Apply the engine outcome to the run
    async fn settle(&self, run: &Run, outcome: Result<ExecutionOutcome>) -> Result<()> {
        let settled = match outcome {
            Ok(ExecutionOutcome::Completed(output)) => self.finish(run, output).await,
            Ok(ExecutionOutcome::Interrupted { signal, snapshot }) => {
                self.pause(run, &signal, &snapshot).await
            }
            Err(err) => Err(err),
        };

        match settled {
            Ok(()) => Ok(()),
            Err(DomainError::Cancelled(_)) => {
                tracing::info!(run_id = %run.id, "run execution stopped by cancellation");
                self.end_unless_terminal(&run.id, |r| r.cancel("cancelled during execution"))
                    .await
            }
            Err(err) => {
                tracing::error!(run_id = %run.id, code = err.code(), error = %err, "run failed");
                let message = err.to_string();
                self.end_unless_terminal(&run.id, |r| r.fail(message.clone()))
                    .await
            }
        }
    }

    async fn end_unless_terminal<F>(&self, run_id: &str, mut end: F) -> Result<()>
    where
        F: FnMut(&mut Run) -> Result<()> + Send,
    {
        transition_run(self.repos.runs.as_ref(), self.events.as_ref(), run_id, |r| {
            if r.is_terminal() {
                Ok(())
            } else {
                end(r)
            }
        })
        .await
        .map(|_| ())
    }

    async fn finish(&self, run: &Run, output: StateMap) -> Result<()> {
        let output = without_gate_keys(output);
        state::record_progress(
            self.checkpoints.as_ref(),
            &run.thread_id,
            ROOT_NAMESPACE,
            output.clone(),
            Vec::new(),
            Vec::new(),
            "loop",
        )
        .await?;
        transition_run(self.repos.runs.as_ref(), self.events.as_ref(), &run.id, |r| {
            r.complete(output.clone())
        })
        .await?;
        tracing::info!(run_id = %run.id, "run completed");
        Ok(())
    }

    async fn pause(
        &self,
        run: &Run,
        signal: &InterruptSignal,
        snapshot: &ResumeSnapshot,
    ) -> Result<()> {
        let mut interrupt = Interrupt::from_signal(&run.id, signal, snapshot)?;
        let created = interrupt.take_events();
        self.repos.interrupts.save(&interrupt).await?;

        let task = json!({
            "id": interrupt.id,
            "name": signal.node_id,
            "interrupts": [{"value": signal.reason, "when": signal.gate}],
        });
        state::record_progress(
            self.checkpoints.as_ref(),
            &run.thread_id,
            ROOT_NAMESPACE,
            without_gate_keys(snapshot.global_state.clone()),
            vec![signal.node_id.clone()],
            vec![task],
            "loop",
        )
        .await?;

        let paused = transition_run(self.repos.runs.as_ref(), self.events.as_ref(), &run.id, |r| {
            r.requires_action(&interrupt.id, &signal.reason, interrupt.tool_calls.clone())
        })
        .await;
        if let Err(err) = paused {
            if let Err(cleanup) = self.repos.interrupts.delete(&interrupt.id).await {
                tracing::warn!(run_id = %run.id, error = %cleanup, "failed to drop orphaned interrupt");
            }
            return Err(err);
        }
        self.publish(created.into_iter().map(DomainEvent::from));

        tracing::info!(
            run_id = %run.id,
            node_id = %signal.node_id,
            gate = %signal.gate,
            interrupt_id = %interrupt.id,
            "run paused for input"
        );
        Ok(())
    }

    /// Resolve the pending interrupt with tool outputs and continue the run
    pub async fn submit_tool_outputs(&self, run_id: &str, tool_outputs: Vec<Value>) -> Result<Run> {
        let mut values = StateMap::new();
        values.insert("tool_outputs".to_string(), Value::Array(tool_outputs.clone()));
        self.resolve_and_resume(run_id, tool_outputs, values).await
    }

    /// Resolve the pending interrupt with `input` and continue the run
    ///
    /// `input` is merged into the run input and into the graph state.
    pub async fn resume_run_with_input(&self, run_id: &str, input: StateMap) -> Result<Run> {
        let tool_outputs = vec![json!({ "resume_input": input })];
        self.resolve_and_resume(run_id, tool_outputs, input).await
    }

    async fn resolve_and_resume(
        &self,
        run_id: &str,
        tool_outputs: Vec<Value>,
        values: StateMap,
    ) -> Result<Run> {
        let run = self.repos.runs.find_by_id(run_id).await?;
        if run.status != RunStatus::RequiresAction {
            return Err(DomainError::invalid_state(run.status.as_str(), "resume"));
        }

        let mut unresolved = self.repos.interrupts.find_unresolved_by_run(run_id).await?;
        let mut interrupt = match unresolved.len() {
            1 => unresolved.remove(0),
            0 => {
                return Err(DomainError::invalid_state(
                    run.status.as_str(),
                    "resume without an unresolved interrupt",
                ))
            }
            n => {
                return Err(DomainError::invalid_state(
                    run.status.as_str(),
                    format!("resume with {n} unresolved interrupts"),
                ))
            }
        };

        let pending = interrupt.clone();
        interrupt.resolve(tool_outputs.clone())?;
        let resolved = interrupt.take_events();
        self.repos.interrupts.save(&interrupt).await?;

        let run = match transition_run(self.repos.runs.as_ref(), self.events.as_ref(), run_id, |r| {
            r.resume(&interrupt.id, tool_outputs.clone(), values.clone())
        })
        .await
        {
            Ok(run) => run,
            Err(err) => {
                // reopen the interrupt so the run can still be resumed
                if let Err(restore) = self.repos.interrupts.save(&pending).await {
                    tracing::warn!(run_id, error = %restore, "failed to reopen interrupt");
                }
                return Err(err);
            }
        };
        self.publish(resolved.into_iter().map(DomainEvent::from));
        tracing::info!(run_id, interrupt_id = %interrupt.id, "run resumed");

        let service = self.clone();
        let resumed = run.clone();
        tokio::spawn(async move {
            if let Err(err) = service.continue_run(resumed, interrupt, values).await {
                tracing::error!(error = %err, "resumed execution failed");
            }
        });
        Ok(run)
    }

    async fn continue_run(&self, run: Run, interrupt: Interrupt, values: StateMap) -> Result<()> {
        let was_dispatched = self
            .workers
            .as_ref()
            .is_some_and(|w| w.assigned_worker(&run.id).is_some());
        if was_dispatched && self.try_dispatch(&run).await {
            return Ok(());
        }

        let cancellation = self.track(&run.id);
        let outcome = self
            .resume_locally(&run, &interrupt, values, cancellation)
            .await;
        let result = self.settle(&run, outcome).await;
        self.cancellations.remove(&run.id);
        result
    }

    async fn resume_locally(
        &self,
        run: &Run,
        interrupt: &Interrupt,
        values: StateMap,
        cancellation: Cancellation,
    ) -> Result<ExecutionOutcome> {
        let graph = self.load_graph(run).await?;
        let snapshot = interrupt.snapshot()?.ok_or_else(|| {
            DomainError::invalid_state(run.status.as_str(), "resume without a saved snapshot")
        })?;

        let mut state = ExecutionState::restore(&run.id, snapshot);
        // edits made through update_state_before_resume land in the checkpoint
        let latest =
            state::get_thread_state(self.checkpoints.as_ref(), &run.thread_id, ROOT_NAMESPACE)
                .await?;
        state.merge(&latest.values);

        let ctx = self.context(run, cancellation);
        self.engine
            .resume(
                &ctx,
                &graph,
                state,
                ResumeFrom::new(&interrupt.node_id, interrupt.gate(), values),
            )
            .await
    }

    /// Edit the thread state of a paused run before it is resumed
    pub async fn update_state_before_resume(
        &self,
        run_id: &str,
        values: StateMap,
    ) -> Result<ThreadState> {
        let run = self.repos.runs.find_by_id(run_id).await?;
        if run.status != RunStatus::RequiresAction {
            return Err(DomainError::invalid_state(
                run.status.as_str(),
                "update state before resume",
            ));
        }
        let as_node = self
            .repos
            .interrupts
            .find_unresolved_by_run(run_id)
            .await?
            .into_iter()
            .next()
            .map(|i| i.node_id);

        let checkpoint = state::update_thread_state(
            self.checkpoints.as_ref(),
            &run.thread_id,
            ROOT_NAMESPACE,
            values,
            as_node.as_deref(),
        )
        .await?;
        tracing::debug!(run_id, checkpoint_id = %checkpoint.checkpoint_id, "state updated before resume");
        Ok(ThreadState::from(&checkpoint))
    }

    /// Cancel a run and stop its execution at the next node boundary
    pub async fn cancel_run(&self, run_id: &str, reason: &str) -> Result<Run> {
        let run = transition_run(self.repos.runs.as_ref(), self.events.as_ref(), run_id, |r| {
            r.cancel(reason)
        })
        .await?;
        if let Some(cancellation) = self.cancellations.get(run_id) {
            cancellation.cancel();
        }
        tracing::info!(run_id, reason, "run cancelled");
        Ok(run)
    }

    /// Poll until the run is terminal or waiting for input
    ///
    /// Gives up with `Timeout` after `timeout` (the configured wait timeout
    /// when `None`); the run itself is left alone.
    pub async fn wait_for_run(&self, run_id: &str, timeout: Option<Duration>) -> Result<Run> {
        let timeout = timeout.unwrap_or(self.wait.timeout);
        let deadline = Instant::now() + timeout;
        loop {
            let run = self.repos.runs.find_by_id(run_id).await?;
            if run.is_terminal() || run.status == RunStatus::RequiresAction {
                return Ok(run);
            }
            if Instant::now() >= deadline {
                return Err(DomainError::timeout(
                    format!("wait for run {run_id}"),
                    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                ));
            }
            tokio::time::sleep(self.wait.poll_interval).await;
        }
    }

    pub async fn create_and_wait_for_run(
        &self,
        params: NewRun,
        timeout: Option<Duration>,
    ) -> Result<Run> {
        let run = self.create_run(params).await?;
        self.start_run(&run.id).await?;
        self.wait_for_run(&run.id, timeout).await
    }

    pub async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        let run = self.repos.runs.find_by_id(run_id).await?;
        if run.thread_id != thread_id {
            return Err(DomainError::not_found("run", run_id));
        }
        Ok(run)
    }

    /// Runs of a thread, newest first
    pub async fn list_runs(&self, thread_id: &str) -> Result<Vec<Run>> {
        if !self.repos.threads.exists(thread_id).await? {
            return Err(DomainError::not_found("thread", thread_id));
        }
        self.repos.runs.find_by_thread(thread_id).await
    }

    /// Delete a finished run
    pub async fn delete_run(&self, thread_id: &str, run_id: &str) -> Result<()> {
        let run = self.get_run(thread_id, run_id).await?;
        if !run.is_terminal() {
            return Err(DomainError::invalid_state(run.status.as_str(), "delete"));
        }
        self.repos.runs.delete(run_id).await?;
        tracing::info!(run_id, "run deleted");
        Ok(())
    }

    fn publish(&self, events: impl IntoIterator<Item = DomainEvent>) {
        self.events.publish_all(events.into_iter().collect());
    }
}

/// Run input plus the interrupt gates from the run config
fn initial_state(run: &Run) -> StateMap {
    let mut state = run.input.clone();
    for key in GATE_KEYS {
        if let Some(value) = run.config.get(key) {
            state.insert(key.to_string(), value.clone());
        }
    }
    state
}

fn without_gate_keys(mut values: StateMap) -> StateMap {
    for key in GATE_KEYS {
        values.remove(key);
    }
    values
}
