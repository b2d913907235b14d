//! Configuration module for duragraph-server
//!
//! - TOML server settings (listen address, engine limits, worker and run timing)
//! - YAML assistant/graph definitions with file includes and environment
//!   variable expansion

pub mod loader;
pub mod server;

pub use loader::{deep_merge, load_assistants, load_yaml_file, AssistantDefinition};
pub use server::{
    AssistantsConfig, EngineSettings, RunSettings, ServerConfig, ServerConfigError,
    ServerInfoConfig, WorkerSettings,
};
