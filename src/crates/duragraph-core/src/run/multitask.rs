use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Policy for a new run on a thread that already has an active run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MultitaskStrategy {
    /// Refuse the new run
    #[default]
    Reject,
    /// Cancel the active run, then proceed
    Interrupt,
    /// Same as `Interrupt`
    Rollback,
    /// Proceed alongside the active run
    Enqueue,
}

/// What the caller must do before creating the new run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultitaskDecision {
    Proceed,
    CancelExisting(String),
    Reject(String),
}

impl MultitaskStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MultitaskStrategy::Reject => "reject",
            MultitaskStrategy::Interrupt => "interrupt",
            MultitaskStrategy::Rollback => "rollback",
            MultitaskStrategy::Enqueue => "enqueue",
        }
    }

    /// Unknown or empty names fall back to `reject`
    pub fn parse_lenient(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "interrupt" => MultitaskStrategy::Interrupt,
            "rollback" => MultitaskStrategy::Rollback,
            "enqueue" => MultitaskStrategy::Enqueue,
            _ => MultitaskStrategy::Reject,
        }
    }

    /// Decide given the id of the thread's active run, if any
    pub fn decide(&self, active_run_id: Option<&str>) -> MultitaskDecision {
        let Some(active) = active_run_id else {
            return MultitaskDecision::Proceed;
        };
        match self {
            MultitaskStrategy::Reject => MultitaskDecision::Reject(active.to_string()),
            MultitaskStrategy::Interrupt | MultitaskStrategy::Rollback => {
                MultitaskDecision::CancelExisting(active.to_string())
            }
            MultitaskStrategy::Enqueue => MultitaskDecision::Proceed,
        }
    }
}

impl fmt::Display for MultitaskStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MultitaskStrategy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MultitaskStrategy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw
            .as_deref()
            .map(MultitaskStrategy::parse_lenient)
            .unwrap_or_default())
    }
}
