//! # duragraph-server
//!
//! Application services and the HTTP API of DuraGraph.
//!
//! [`services`] sequence the aggregates from `duragraph-core` into the run
//! lifecycle: create, execute locally or hand to a worker, pause on an
//! interrupt, resume and settle. [`api`] exposes them over axum, and
//! [`config`] reads the server TOML and the assistant YAML preload file.

pub mod api;
pub mod config;
pub mod services;

pub use api::{create_router, AppState};
pub use config::ServerConfig;
pub use services::{AssistantService, Repositories, RunService, ThreadService, WorkerService};
