//! Conversation threads

use crate::error::{DomainError, Result};
use crate::events::Event;
use crate::StateMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            "" => Err(DomainError::invalid_input("role", "role is required")),
            _ => Err(DomainError::invalid_input(
                "role",
                "role must be user, assistant, or system",
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub metadata: StateMap,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ThreadEvent {
    #[serde(rename = "thread.created")]
    Created {
        thread_id: String,
        metadata: StateMap,
        occurred_at: DateTime<Utc>,
    },
    #[serde(rename = "thread.updated")]
    Updated {
        thread_id: String,
        metadata: StateMap,
        occurred_at: DateTime<Utc>,
    },
    #[serde(rename = "thread.message_added")]
    MessageAdded {
        thread_id: String,
        message: Message,
        occurred_at: DateTime<Utc>,
    },
}

impl ThreadEvent {
    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ThreadEvent::Created { occurred_at, .. }
            | ThreadEvent::Updated { occurred_at, .. }
            | ThreadEvent::MessageAdded { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Event for ThreadEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ThreadEvent::Created { .. } => "thread.created",
            ThreadEvent::Updated { .. } => "thread.updated",
            ThreadEvent::MessageAdded { .. } => "thread.message_added",
        }
    }

    fn aggregate_id(&self) -> &str {
        match self {
            ThreadEvent::Created { thread_id, .. }
            | ThreadEvent::Updated { thread_id, .. }
            | ThreadEvent::MessageAdded { thread_id, .. } => thread_id,
        }
    }

    fn aggregate_type(&self) -> &'static str {
        "thread"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub metadata: StateMap,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pending: Vec<ThreadEvent>,
}

impl Thread {
    pub fn new(metadata: StateMap) -> Self {
        let now = Utc::now();
        let mut thread = Self {
            id: String::new(),
            metadata: StateMap::new(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            pending: Vec::new(),
        };
        thread.record(ThreadEvent::Created {
            thread_id: uuid::Uuid::new_v4().to_string(),
            metadata,
            occurred_at: now,
        });
        thread
    }

    pub fn add_message(&mut self, role: &str, content: &str, metadata: StateMap) -> Result<&Message> {
        let role: Role = role.parse()?;
        if content.is_empty() {
            return Err(DomainError::invalid_input("content", "content is required"));
        }

        let now = Utc::now();
        self.record(ThreadEvent::MessageAdded {
            thread_id: self.id.clone(),
            message: Message {
                id: uuid::Uuid::new_v4().to_string(),
                role,
                content: content.to_string(),
                metadata,
                created_at: now,
            },
            occurred_at: now,
        });
        self.messages
            .last()
            .ok_or_else(|| DomainError::invalid_state("empty", "add_message"))
    }

    pub fn update_metadata(&mut self, metadata: StateMap) {
        self.record(ThreadEvent::Updated {
            thread_id: self.id.clone(),
            metadata,
            occurred_at: Utc::now(),
        });
    }

    pub fn apply(&mut self, event: &ThreadEvent) {
        match event {
            ThreadEvent::Created {
                thread_id,
                metadata,
                occurred_at,
            } => {
                self.id = thread_id.clone();
                self.metadata = metadata.clone();
                self.created_at = *occurred_at;
            }
            ThreadEvent::Updated { metadata, .. } => {
                self.metadata = metadata.clone();
            }
            ThreadEvent::MessageAdded { message, .. } => {
                self.messages.push(message.clone());
            }
        }
        self.updated_at = event.occurred_at();
    }

    fn record(&mut self, event: ThreadEvent) {
        self.apply(&event);
        self.pending.push(event);
    }

    pub fn take_events(&mut self) -> Vec<ThreadEvent> {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_thread_records_created() {
        let mut thread = Thread::new(StateMap::new());
        assert!(!thread.id.is_empty());
        let events = thread.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "thread.created");
        assert_eq!(events[0].aggregate_id(), thread.id);
    }

    #[test]
    fn test_message_validation() {
        let mut thread = Thread::new(StateMap::new());
        assert!(thread.add_message("robot", "hi", StateMap::new()).is_err());
        assert!(thread.add_message("", "hi", StateMap::new()).is_err());
        assert!(thread.add_message("user", "", StateMap::new()).is_err());

        let message = thread.add_message("user", "hello", StateMap::new()).unwrap();
        assert_eq!(message.role, Role::User);
        assert_eq!(thread.messages.len(), 1);
    }

    #[test]
    fn test_update_metadata() {
        let mut thread = Thread::new(StateMap::new());
        let mut metadata = StateMap::new();
        metadata.insert("owner".into(), serde_json::json!("ops"));
        thread.update_metadata(metadata);
        assert_eq!(thread.metadata["owner"], serde_json::json!("ops"));
        assert_eq!(thread.take_events().last().unwrap().event_type(), "thread.updated");
    }
}
