//! # duragraph-core - Durable run execution
//!
//! The domain core of DuraGraph: the run state machine, the graph model and
//! its execution engine, human-in-the-loop interrupts, threads, assistants and
//! the worker registry used for remote execution.
//!
//! ## Core pieces
//!
//! - [`run::Run`] - event-sourced run aggregate with a guarded status machine
//! - [`graph::Graph`] - validated nodes and edges with optional conditions
//! - [`execution::GraphEngine`] - queue-driven traversal with interrupt gates,
//!   cycle limits, cancellation and nested subgraphs
//! - [`humanloop::Interrupt`] - a paused run waiting for outside input
//! - [`worker::WorkerRegistry`] / [`worker::TaskQueue`] - remote workers and
//!   their pending tasks
//! - [`repository`] - async persistence traits with in-memory stores
//! - [`events`] - domain events and the sinks they are published to
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use duragraph_core::execution::{ExecutionContext, ExecutionOutcome, GraphEngine};
//! use duragraph_core::graph::Graph;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let graph = Graph::from_value(
//!         "assistant-1",
//!         json!({
//!             "nodes": [
//!                 {"id": "start", "type": "start"},
//!                 {"id": "answer", "type": "llm", "config": {"model": "gpt-4o"}},
//!                 {"id": "end", "type": "end"}
//!             ],
//!             "edges": [
//!                 {"source": "start", "target": "answer"},
//!                 {"source": "answer", "target": "end"}
//!             ]
//!         }),
//!     )?;
//!
//!     let engine = GraphEngine::default();
//!     let ctx = ExecutionContext::new("run-1", "thread-1");
//!     let mut input = serde_json::Map::new();
//!     input.insert("question".into(), json!("hello"));
//!
//!     if let ExecutionOutcome::Completed(output) = engine.execute(&ctx, &graph, input).await? {
//!         println!("{}", serde_json::Value::Object(output));
//!     }
//!     Ok(())
//! }
//! ```

pub mod assistant;
pub mod error;
pub mod events;
pub mod execution;
pub mod graph;
pub mod humanloop;
pub mod repository;
pub mod run;
pub mod thread;
pub mod worker;

/// Free-form JSON object used for run input, output and graph state
pub type StateMap = serde_json::Map<String, serde_json::Value>;

pub use assistant::Assistant;
pub use error::{DomainError, Result};
pub use events::{DomainEvent, Event, EventSink};
pub use graph::{Edge, Graph, GraphDefinition, Node, NodeType};
pub use humanloop::{Interrupt, InterruptReason};
pub use run::{MultitaskStrategy, NewRun, Run, RunStatus};
pub use thread::{Message, Role, Thread};
pub use worker::{Worker, WorkerRegistry, WorkerStatus};
