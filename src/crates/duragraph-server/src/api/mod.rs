//! REST API for DuraGraph
//!
//! - Worker protocol: registration, heartbeats, task polling, run reports
//! - Assistants with inline graphs
//! - Threads, thread state and checkpoint history
//! - Runs: create, wait, cancel, resume

pub mod error;
pub mod handlers;
pub mod models;
pub mod routes;

pub use error::{ApiError, ApiErrorResponse, ApiResult};
pub use routes::{create_router, AppState};
