//! Run aggregate
//!
//! A [`Run`] is one execution of an assistant's graph against a thread. It is
//! a pure state machine: every mutator checks the transition table in
//! [`RunStatus::can_transition_to`], builds a [`RunEvent`], feeds it through
//! [`Run::apply`] and queues it for publishing. Nothing else writes the
//! fields.
//!
//! ```text
//!            start             requires_action
//!  queued ─────────► in_progress ◄──────────► requires_action
//!    │                  │   resume               │
//!    │ cancel           │ complete/fail/cancel   │ complete/fail/cancel
//!    ▼                  ▼                        ▼
//!  cancelled     completed | failed | cancelled (terminal)
//! ```
//!
//! `version` counts applied events. Repositories compare
//! [`Run::expected_version`] against what they hold to detect lost updates.

use crate::error::{DomainError, Result};
use crate::run::{MultitaskStrategy, RunEvent, RunStatus};
use crate::StateMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default `config.recursion_limit`
pub const DEFAULT_RECURSION_LIMIT: u32 = 25;

/// Parameters for creating a run
#[derive(Debug, Clone, Default)]
pub struct NewRun {
    pub thread_id: String,
    pub assistant_id: String,
    pub input: StateMap,
    pub config: StateMap,
    pub metadata: StateMap,
    pub multitask_strategy: MultitaskStrategy,
}

impl NewRun {
    pub fn new(thread_id: impl Into<String>, assistant_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            assistant_id: assistant_id.into(),
            ..Default::default()
        }
    }

    pub fn with_input(mut self, input: StateMap) -> Self {
        self.input = input;
        self
    }

    pub fn with_config(mut self, config: StateMap) -> Self {
        self.config = config;
        self
    }

    pub fn with_metadata(mut self, metadata: StateMap) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_multitask_strategy(mut self, strategy: MultitaskStrategy) -> Self {
        self.multitask_strategy = strategy;
        self
    }
}

/// One execution of a graph against a thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub thread_id: String,
    pub assistant_id: String,
    pub status: RunStatus,
    pub input: StateMap,
    pub output: StateMap,
    pub error: Option<String>,
    pub metadata: StateMap,
    pub config: StateMap,
    pub multitask_strategy: MultitaskStrategy,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
    #[serde(skip)]
    pending: Vec<RunEvent>,
}

impl Run {
    /// Create a queued run and record `run.created`
    pub fn create(params: NewRun) -> Result<Self> {
        if params.thread_id.trim().is_empty() {
            return Err(DomainError::invalid_input("thread_id", "must not be empty"));
        }
        if params.assistant_id.trim().is_empty() {
            return Err(DomainError::invalid_input("assistant_id", "must not be empty"));
        }

        let mut run = Self::blank();
        run.record(RunEvent::Created {
            run_id: uuid::Uuid::new_v4().to_string(),
            thread_id: params.thread_id,
            assistant_id: params.assistant_id,
            input: params.input,
            config: params.config,
            metadata: params.metadata,
            multitask_strategy: params.multitask_strategy,
            occurred_at: Utc::now(),
        });
        Ok(run)
    }

    /// Rebuild a run by replaying its events; the first must be `run.created`
    pub fn reconstruct(events: &[RunEvent]) -> Result<Self> {
        match events.first() {
            Some(RunEvent::Created { .. }) => {}
            Some(other) => {
                return Err(DomainError::invalid_input(
                    "events",
                    format!("first event must be run.created, got {:?}", other),
                ))
            }
            None => return Err(DomainError::invalid_input("events", "no events to replay")),
        }

        let mut run = Self::blank();
        for event in events {
            run.apply(event);
        }
        Ok(run)
    }

    /// Rebuild a run from a persisted projection without replaying events
    pub fn restore(snapshot: RunSnapshot) -> Self {
        Self {
            id: snapshot.id,
            thread_id: snapshot.thread_id,
            assistant_id: snapshot.assistant_id,
            status: snapshot.status,
            input: snapshot.input,
            output: snapshot.output,
            error: snapshot.error,
            metadata: snapshot.metadata,
            config: snapshot.config,
            multitask_strategy: snapshot.multitask_strategy,
            created_at: snapshot.created_at,
            started_at: snapshot.started_at,
            completed_at: snapshot.completed_at,
            updated_at: snapshot.updated_at,
            version: snapshot.version,
            pending: Vec::new(),
        }
    }

    /// Projection of the committed fields, for storage
    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            id: self.id.clone(),
            thread_id: self.thread_id.clone(),
            assistant_id: self.assistant_id.clone(),
            status: self.status,
            input: self.input.clone(),
            output: self.output.clone(),
            error: self.error.clone(),
            metadata: self.metadata.clone(),
            config: self.config.clone(),
            multitask_strategy: self.multitask_strategy,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            updated_at: self.updated_at,
            version: self.version,
        }
    }

    fn blank() -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            thread_id: String::new(),
            assistant_id: String::new(),
            status: RunStatus::Queued,
            input: StateMap::new(),
            output: StateMap::new(),
            error: None,
            metadata: StateMap::new(),
            config: StateMap::new(),
            multitask_strategy: MultitaskStrategy::default(),
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            version: 0,
            pending: Vec::new(),
        }
    }

    pub fn start(&mut self) -> Result<()> {
        self.guard(RunStatus::InProgress, "start")?;
        self.record(RunEvent::Started {
            run_id: self.id.clone(),
            occurred_at: Utc::now(),
        });
        Ok(())
    }

    pub fn complete(&mut self, output: StateMap) -> Result<()> {
        self.guard(RunStatus::Completed, "complete")?;
        self.record(RunEvent::Completed {
            run_id: self.id.clone(),
            output,
            occurred_at: Utc::now(),
        });
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.guard(RunStatus::Failed, "fail")?;
        self.record(RunEvent::Failed {
            run_id: self.id.clone(),
            error: error.into(),
            occurred_at: Utc::now(),
        });
        Ok(())
    }

    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<()> {
        self.guard(RunStatus::Cancelled, "cancel")?;
        self.record(RunEvent::Cancelled {
            run_id: self.id.clone(),
            reason: reason.into(),
            occurred_at: Utc::now(),
        });
        Ok(())
    }

    pub fn requires_action(
        &mut self,
        interrupt_id: impl Into<String>,
        reason: impl Into<String>,
        tool_calls: Vec<Value>,
    ) -> Result<()> {
        self.guard(RunStatus::RequiresAction, "requires_action")?;
        self.record(RunEvent::RequiresAction {
            run_id: self.id.clone(),
            interrupt_id: interrupt_id.into(),
            reason: reason.into(),
            tool_calls,
            occurred_at: Utc::now(),
        });
        Ok(())
    }

    /// Leave `requires_action`; `input_patch` is merged into the run input
    pub fn resume(
        &mut self,
        interrupt_id: impl Into<String>,
        tool_outputs: Vec<Value>,
        input_patch: StateMap,
    ) -> Result<()> {
        self.guard(RunStatus::InProgress, "resume")?;
        // in_progress is also reachable from queued, which is a start
        if self.status != RunStatus::RequiresAction {
            return Err(DomainError::invalid_state(self.status.as_str(), "resume"));
        }
        self.record(RunEvent::Resumed {
            run_id: self.id.clone(),
            interrupt_id: interrupt_id.into(),
            tool_outputs,
            input_patch,
            occurred_at: Utc::now(),
        });
        Ok(())
    }

    /// The only place run fields change
    pub fn apply(&mut self, event: &RunEvent) {
        match event {
            RunEvent::Created {
                run_id,
                thread_id,
                assistant_id,
                input,
                config,
                metadata,
                multitask_strategy,
                occurred_at,
            } => {
                self.id = run_id.clone();
                self.thread_id = thread_id.clone();
                self.assistant_id = assistant_id.clone();
                self.input = input.clone();
                self.config = config.clone();
                self.metadata = metadata.clone();
                self.multitask_strategy = *multitask_strategy;
                self.status = RunStatus::Queued;
                self.created_at = *occurred_at;
            }
            RunEvent::Started { occurred_at, .. } => {
                self.status = RunStatus::InProgress;
                self.started_at = Some(*occurred_at);
            }
            RunEvent::Completed {
                output,
                occurred_at,
                ..
            } => {
                self.status = RunStatus::Completed;
                self.output = output.clone();
                self.completed_at = Some(*occurred_at);
            }
            RunEvent::Failed {
                error, occurred_at, ..
            } => {
                self.status = RunStatus::Failed;
                self.error = Some(error.clone());
                self.completed_at = Some(*occurred_at);
            }
            RunEvent::Cancelled { occurred_at, .. } => {
                self.status = RunStatus::Cancelled;
                self.completed_at = Some(*occurred_at);
            }
            RunEvent::RequiresAction { .. } => {
                self.status = RunStatus::RequiresAction;
            }
            RunEvent::Resumed { input_patch, .. } => {
                self.status = RunStatus::InProgress;
                for (key, value) in input_patch {
                    self.input.insert(key.clone(), value.clone());
                }
            }
        }
        self.updated_at = event.occurred_at();
        self.version += 1;
    }

    fn guard(&self, target: RunStatus, operation: &str) -> Result<()> {
        if self.status.can_transition_to(target) {
            Ok(())
        } else {
            Err(DomainError::invalid_state(self.status.as_str(), operation))
        }
    }

    fn record(&mut self, event: RunEvent) {
        self.apply(&event);
        self.pending.push(event);
    }

    /// Events recorded since the last [`take_events`](Self::take_events)
    pub fn pending_events(&self) -> &[RunEvent] {
        &self.pending
    }

    /// Drain recorded events for publishing
    pub fn take_events(&mut self) -> Vec<RunEvent> {
        std::mem::take(&mut self.pending)
    }

    /// Version the stored copy must have for a save of this run to succeed
    pub fn expected_version(&self) -> u64 {
        self.version - self.pending.len() as u64
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `config.recursion_limit`, or 25 when absent or not a positive integer
    pub fn recursion_limit(&self) -> u32 {
        self.config
            .get("recursion_limit")
            .and_then(Value::as_u64)
            .filter(|limit| *limit > 0)
            .and_then(|limit| u32::try_from(limit).ok())
            .unwrap_or(DEFAULT_RECURSION_LIMIT)
    }

    pub fn tags(&self) -> Vec<String> {
        self.config
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn configurable(&self) -> StateMap {
        self.config
            .get("configurable")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }
}

/// Stored form of a [`Run`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub id: String,
    pub thread_id: String,
    pub assistant_id: String,
    pub status: RunStatus,
    pub input: StateMap,
    pub output: StateMap,
    pub error: Option<String>,
    pub metadata: StateMap,
    pub config: StateMap,
    pub multitask_strategy: MultitaskStrategy,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}
