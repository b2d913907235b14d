//! Server configuration for duragraph-server
//!
//! Loads `duragraph.toml`. Every section is optional and falls back to its
//! defaults, so an empty file (or no file at all) yields a working server.

use duragraph_core::execution::{EngineConfig, DEFAULT_MAX_ITERATIONS, DEFAULT_MAX_SUBGRAPH_DEPTH};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Server identification and listen address
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInfoConfig {
    pub host: String,
    pub port: u16,
    /// Name reported by the health endpoint
    pub name: String,
}

impl Default for ServerInfoConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            name: "duragraph-server".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Visits allowed per node before a run fails
    pub max_iterations: u32,
    pub max_subgraph_depth: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_subgraph_depth: DEFAULT_MAX_SUBGRAPH_DEPTH,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Dispatch runs to registered workers before executing locally
    pub enabled: bool,
    /// A worker silent for longer than this is unhealthy
    pub heartbeat_threshold_secs: u64,
    /// How often stale workers are marked offline
    pub cleanup_interval_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            heartbeat_threshold_secs: 30,
            cleanup_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub wait_timeout_secs: u64,
    pub wait_poll_interval_ms: u64,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            wait_timeout_secs: 300,
            wait_poll_interval_ms: 500,
        }
    }
}

/// Assistants preloaded at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantsConfig {
    /// YAML file with assistant and graph definitions
    pub path: Option<PathBuf>,
}

/// Complete server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerInfoConfig,
    pub engine: EngineSettings,
    pub worker: WorkerSettings,
    pub runs: RunSettings,
    pub assistants: AssistantsConfig,
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ServerConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ServerConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_str(&content)?;

        // Relative assistant files resolve against the config file
        if let (Some(assistants), Some(dir)) = (config.assistants.path.as_ref(), path.parent()) {
            if assistants.is_relative() {
                config.assistants.path = Some(dir.join(assistants));
            }
        }
        Ok(config)
    }

    /// Load configuration from TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ServerConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the configuration file
    ///
    /// Searches, in order:
    /// 1. `explicit` (the `--config` flag)
    /// 2. the `CONFIG_PATH` environment variable
    /// 3. `./config/duragraph.toml`
    /// 4. `./duragraph.toml`
    ///
    /// Falls back to defaults when nothing is found.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ServerConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        if let Ok(config_path) = std::env::var("CONFIG_PATH") {
            return Self::from_file(config_path);
        }

        let paths = [
            PathBuf::from("config/duragraph.toml"),
            PathBuf::from("./duragraph.toml"),
        ];
        for path in &paths {
            if path.exists() {
                return Self::from_file(path);
            }
        }

        tracing::info!("no configuration file found, using defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<(), ServerConfigError> {
        if self.engine.max_iterations == 0 {
            return Err(ServerConfigError::InvalidConfig(
                "engine.max_iterations must be greater than 0".to_string(),
            ));
        }
        if self.runs.wait_poll_interval_ms == 0 {
            return Err(ServerConfigError::InvalidConfig(
                "runs.wait_poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.worker.cleanup_interval_secs == 0 {
            return Err(ServerConfigError::InvalidConfig(
                "worker.cleanup_interval_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ServerConfigError> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| {
                ServerConfigError::InvalidConfig(format!(
                    "invalid listen address {}:{}: {}",
                    self.server.host, self.server.port, e
                ))
            })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_iterations: self.engine.max_iterations,
            max_subgraph_depth: self.engine.max_subgraph_depth,
        }
    }

    pub fn heartbeat_threshold(&self) -> Duration {
        Duration::from_secs(self.worker.heartbeat_threshold_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.worker.cleanup_interval_secs)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.runs.wait_timeout_secs)
    }

    pub fn wait_poll_interval(&self) -> Duration {
        Duration::from_millis(self.runs.wait_poll_interval_ms)
    }
}
