use crate::error::{DomainError, Result};
use crate::StateMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named, configured entry point to a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assistant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: StateMap,
    #[serde(default)]
    pub config: StateMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Assistant {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        Self::with_id(uuid::Uuid::new_v4().to_string(), name)
    }

    /// Assistant with a caller-chosen id, as used by preloaded definitions
    pub fn with_id(id: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let name = name.into();
        if id.trim().is_empty() {
            return Err(DomainError::invalid_input("assistant_id", "must not be empty"));
        }
        if name.trim().is_empty() {
            return Err(DomainError::invalid_input("name", "name is required"));
        }
        let now = Utc::now();
        Ok(Self {
            id,
            name,
            description: String::new(),
            metadata: StateMap::new(),
            config: StateMap::new(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_metadata(mut self, metadata: StateMap) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_config(mut self, config: StateMap) -> Self {
        self.config = config;
        self
    }

    /// `metadata.graph_id`, falling back to the assistant id
    pub fn graph_id(&self) -> &str {
        self.metadata
            .get("graph_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.id)
    }
}
