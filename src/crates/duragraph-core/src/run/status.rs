//! Run status vocabulary and transition table

use crate::error::{DomainError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Canonical run status
///
/// Legacy names are accepted on input and normalized:
///
/// | Legacy | Canonical |
/// |--------|-----------|
/// | `pending` | `queued` |
/// | `running` | `in_progress` |
/// | `success` | `completed` |
/// | `error`, `timeout` | `failed` |
/// | `interrupted` | `requires_action` |
///
/// Serialization always produces the canonical name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub const ALL: [RunStatus; 6] = [
        RunStatus::Queued,
        RunStatus::InProgress,
        RunStatus::RequiresAction,
        RunStatus::Completed,
        RunStatus::Failed,
        RunStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    /// Map any known status name, canonical or legacy, to a status
    pub fn normalize(name: &str) -> Option<RunStatus> {
        match name.trim().to_ascii_lowercase().as_str() {
            "queued" | "pending" => Some(RunStatus::Queued),
            "in_progress" | "running" => Some(RunStatus::InProgress),
            "requires_action" | "interrupted" => Some(RunStatus::RequiresAction),
            "completed" | "success" => Some(RunStatus::Completed),
            "failed" | "error" | "timeout" => Some(RunStatus::Failed),
            "cancelled" | "canceled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }

    /// No transition leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// Non-terminal statuses count as active for multitask checks
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(&self, target: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, target),
            (Queued, InProgress)
                | (Queued, Cancelled)
                | (InProgress, RequiresAction)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Cancelled)
                | (RequiresAction, InProgress)
                | (RequiresAction, Completed)
                | (RequiresAction, Failed)
                | (RequiresAction, Cancelled)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        RunStatus::normalize(s)
            .ok_or_else(|| DomainError::invalid_input("status", format!("unknown run status '{s}'")))
    }
}

impl Serialize for RunStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RunStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        RunStatus::normalize(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown run status '{raw}'")))
    }
}
