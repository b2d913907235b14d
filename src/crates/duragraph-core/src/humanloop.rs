//! Human-in-the-loop interrupts
//!
//! An [`Interrupt`] records why a run paused and everything needed to continue
//! it. Its `state` holds the engine's [`ResumeSnapshot`] together with the
//! [`Gate`] that fired, so the run resumes where it stopped:
//!
//! ```text
//! engine pause ──► Interrupt::from_signal ──► run.requires_action
//!                                                   │
//!    submit_tool_outputs / resume ──► Interrupt::resolve ──► run.resumed
//! ```
//!
//! At most one unresolved interrupt exists per run.

use crate::error::{DomainError, Result};
use crate::events::Event;
use crate::execution::{Gate, InterruptSignal, ResumeSnapshot};
use crate::StateMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

const GATE_KEY: &str = "gate";
const SNAPSHOT_KEY: &str = "snapshot";
const PAYLOAD_KEY: &str = "payload";
const MESSAGE_KEY: &str = "message";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptReason {
    ToolCall,
    ApprovalRequired,
    InputNeeded,
}

impl InterruptReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterruptReason::ToolCall => "tool_call",
            InterruptReason::ApprovalRequired => "approval_required",
            InterruptReason::InputNeeded => "input_needed",
        }
    }
}

impl fmt::Display for InterruptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InterruptEvent {
    #[serde(rename = "interrupt.created")]
    Created {
        interrupt_id: String,
        run_id: String,
        node_id: String,
        reason: InterruptReason,
        #[serde(default)]
        tool_calls: Vec<Value>,
        occurred_at: DateTime<Utc>,
    },
    #[serde(rename = "interrupt.resolved")]
    Resolved {
        interrupt_id: String,
        run_id: String,
        #[serde(default)]
        tool_outputs: Vec<Value>,
        occurred_at: DateTime<Utc>,
    },
}

impl InterruptEvent {
    pub fn run_id(&self) -> &str {
        match self {
            InterruptEvent::Created { run_id, .. } | InterruptEvent::Resolved { run_id, .. } => {
                run_id
            }
        }
    }
}

impl Event for InterruptEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InterruptEvent::Created { .. } => "interrupt.created",
            InterruptEvent::Resolved { .. } => "interrupt.resolved",
        }
    }

    fn aggregate_id(&self) -> &str {
        match self {
            InterruptEvent::Created { interrupt_id, .. }
            | InterruptEvent::Resolved { interrupt_id, .. } => interrupt_id,
        }
    }

    fn aggregate_type(&self) -> &'static str {
        "interrupt"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interrupt {
    pub id: String,
    pub run_id: String,
    pub node_id: String,
    pub reason: InterruptReason,
    pub state: StateMap,
    pub tool_calls: Vec<Value>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Tool outputs supplied on resolution
    pub resolution: Vec<Value>,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pending: Vec<InterruptEvent>,
}

impl Interrupt {
    pub fn new(
        run_id: impl Into<String>,
        node_id: impl Into<String>,
        reason: InterruptReason,
        state: StateMap,
        tool_calls: Vec<Value>,
    ) -> Result<Self> {
        let run_id = run_id.into();
        let node_id = node_id.into();
        if run_id.is_empty() {
            return Err(DomainError::invalid_input("run_id", "run_id is required"));
        }
        if node_id.is_empty() {
            return Err(DomainError::invalid_input("node_id", "node_id is required"));
        }

        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();
        let created = InterruptEvent::Created {
            interrupt_id: id.clone(),
            run_id: run_id.clone(),
            node_id: node_id.clone(),
            reason,
            tool_calls: tool_calls.clone(),
            occurred_at: now,
        };

        Ok(Self {
            id,
            run_id,
            node_id,
            reason,
            state,
            tool_calls,
            resolved: false,
            resolved_at: None,
            resolution: Vec::new(),
            created_at: now,
            pending: vec![created],
        })
    }

    /// Interrupt for an engine pause; `state` carries the gate and snapshot
    pub fn from_signal(
        run_id: impl Into<String>,
        signal: &InterruptSignal,
        snapshot: &ResumeSnapshot,
    ) -> Result<Self> {
        let mut state = StateMap::new();
        state.insert(GATE_KEY.into(), serde_json::to_value(signal.gate)?);
        state.insert(SNAPSHOT_KEY.into(), snapshot.to_value()?);
        state.insert(PAYLOAD_KEY.into(), signal.payload.clone());
        state.insert(MESSAGE_KEY.into(), json!(signal.reason));
        Self::new(
            run_id,
            &signal.node_id,
            InterruptReason::ToolCall,
            state,
            signal.tool_calls(),
        )
    }

    /// Gate that fired; `node` when the interrupt was not created by the engine
    pub fn gate(&self) -> Gate {
        self.state
            .get(GATE_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or(Gate::Node)
    }

    /// Engine progress at the pause, if recorded
    pub fn snapshot(&self) -> Result<Option<ResumeSnapshot>> {
        self.state
            .get(SNAPSHOT_KEY)
            .map(ResumeSnapshot::from_value)
            .transpose()
    }

    pub fn message(&self) -> Option<&str> {
        self.state.get(MESSAGE_KEY).and_then(Value::as_str)
    }

    pub fn resolve(&mut self, tool_outputs: Vec<Value>) -> Result<()> {
        if self.resolved {
            return Err(DomainError::invalid_state("resolved", "resolve"));
        }
        let now = Utc::now();
        self.resolved = true;
        self.resolved_at = Some(now);
        self.resolution = tool_outputs.clone();
        self.pending.push(InterruptEvent::Resolved {
            interrupt_id: self.id.clone(),
            run_id: self.run_id.clone(),
            tool_outputs,
            occurred_at: now,
        });
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<InterruptEvent> {
        std::mem::take(&mut self.pending)
    }
}
