use crate::events::Event;
use crate::run::MultitaskStrategy;
use crate::StateMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events recorded by the [`Run`](crate::run::Run) aggregate
///
/// `Run::apply` is the single reducer for these; the mutators build an event,
/// apply it and queue it for publishing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RunEvent {
    #[serde(rename = "run.created")]
    Created {
        run_id: String,
        thread_id: String,
        assistant_id: String,
        input: StateMap,
        config: StateMap,
        metadata: StateMap,
        multitask_strategy: MultitaskStrategy,
        occurred_at: DateTime<Utc>,
    },
    #[serde(rename = "run.started")]
    Started {
        run_id: String,
        occurred_at: DateTime<Utc>,
    },
    #[serde(rename = "run.completed")]
    Completed {
        run_id: String,
        output: StateMap,
        occurred_at: DateTime<Utc>,
    },
    #[serde(rename = "run.failed")]
    Failed {
        run_id: String,
        error: String,
        occurred_at: DateTime<Utc>,
    },
    #[serde(rename = "run.cancelled")]
    Cancelled {
        run_id: String,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
    #[serde(rename = "run.requires_action")]
    RequiresAction {
        run_id: String,
        interrupt_id: String,
        reason: String,
        #[serde(default)]
        tool_calls: Vec<Value>,
        occurred_at: DateTime<Utc>,
    },
    #[serde(rename = "run.resumed")]
    Resumed {
        run_id: String,
        interrupt_id: String,
        #[serde(default)]
        tool_outputs: Vec<Value>,
        /// Merged into the run input when applied
        #[serde(default)]
        input_patch: StateMap,
        occurred_at: DateTime<Utc>,
    },
}

impl RunEvent {
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            RunEvent::Created { occurred_at, .. }
            | RunEvent::Started { occurred_at, .. }
            | RunEvent::Completed { occurred_at, .. }
            | RunEvent::Failed { occurred_at, .. }
            | RunEvent::Cancelled { occurred_at, .. }
            | RunEvent::RequiresAction { occurred_at, .. }
            | RunEvent::Resumed { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Event for RunEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RunEvent::Created { .. } => "run.created",
            RunEvent::Started { .. } => "run.started",
            RunEvent::Completed { .. } => "run.completed",
            RunEvent::Failed { .. } => "run.failed",
            RunEvent::Cancelled { .. } => "run.cancelled",
            RunEvent::RequiresAction { .. } => "run.requires_action",
            RunEvent::Resumed { .. } => "run.resumed",
        }
    }

    fn aggregate_id(&self) -> &str {
        match self {
            RunEvent::Created { run_id, .. }
            | RunEvent::Started { run_id, .. }
            | RunEvent::Completed { run_id, .. }
            | RunEvent::Failed { run_id, .. }
            | RunEvent::Cancelled { run_id, .. }
            | RunEvent::RequiresAction { run_id, .. }
            | RunEvent::Resumed { run_id, .. } => run_id,
        }
    }

    fn aggregate_type(&self) -> &'static str {
        "run"
    }
}
