//! API route definitions and shared state

use axum::{
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use duragraph_checkpoint::{CheckpointStore, InMemoryCheckpointStore};
use duragraph_core::events::{BroadcastEventSink, EventSink};
use duragraph_core::execution::{ExecutorRegistry, GraphEngine};
use duragraph_core::repository::RepositoryGraphResolver;
use duragraph_core::worker::{TaskQueue, WorkerRegistry};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers;
use crate::config::ServerConfig;
use crate::services::{
    AssistantService, Repositories, RunService, ThreadService, WaitSettings, WorkerService,
};

/// Buffered events per broadcast subscriber
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub runs: RunService,
    pub threads: ThreadService,
    pub workers: WorkerService,
    pub assistants: AssistantService,
    pub events: Arc<BroadcastEventSink>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Wire every service over in-memory repositories and checkpoints
    pub fn in_memory(config: &ServerConfig) -> Self {
        let repos = Repositories::in_memory();
        let checkpoints: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
        let broadcast = Arc::new(BroadcastEventSink::new(EVENT_CHANNEL_CAPACITY));
        let events: Arc<dyn EventSink> = broadcast.clone();

        let engine_config = config.engine_config();
        let executors = ExecutorRegistry::with_defaults(engine_config.max_subgraph_depth)
            .with_graph_resolver(Arc::new(RepositoryGraphResolver::new(repos.graphs.clone())));
        let engine = GraphEngine::with_registry(engine_config, executors);

        let workers = WorkerService::new(
            Arc::new(WorkerRegistry::new()),
            TaskQueue::new(),
            repos.runs.clone(),
            repos.interrupts.clone(),
            events.clone(),
            config.heartbeat_threshold(),
        );

        let mut runs = RunService::new(repos.clone(), checkpoints.clone(), engine, events.clone())
            .with_wait_settings(WaitSettings {
                timeout: config.wait_timeout(),
                poll_interval: config.wait_poll_interval(),
            });
        if config.worker.enabled {
            runs = runs.with_workers(workers.clone());
        }

        Self {
            config: Arc::new(config.clone()),
            runs,
            threads: ThreadService::new(repos.clone(), checkpoints, events),
            workers,
            assistants: AssistantService::new(repos),
            events: broadcast,
            started_at: Utc::now(),
        }
    }
}

/// Build the complete API router
pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Worker protocol
        .route("/api/v1/workers", get(handlers::list_workers))
        .route("/api/v1/workers/register", post(handlers::register_worker))
        .route("/api/v1/workers/graphs/:graph_id", get(handlers::get_worker_graph))
        .route("/api/v1/workers/:id", get(handlers::get_worker))
        .route("/api/v1/workers/:id/heartbeat", post(handlers::worker_heartbeat))
        .route("/api/v1/workers/:id/poll", post(handlers::poll_tasks))
        .route("/api/v1/workers/:id/events", post(handlers::worker_event))
        .route("/api/v1/workers/:id/deregister", post(handlers::deregister_worker))
        // Assistants
        .route(
            "/api/v1/assistants",
            post(handlers::create_assistant).get(handlers::list_assistants),
        )
        .route("/api/v1/assistants/:id", get(handlers::get_assistant))
        // Threads
        .route("/api/v1/threads", post(handlers::create_thread))
        .route(
            "/api/v1/threads/:id",
            get(handlers::get_thread).delete(handlers::delete_thread),
        )
        .route("/api/v1/threads/:id/copy", post(handlers::copy_thread))
        .route("/api/v1/threads/:id/messages", post(handlers::add_message))
        .route(
            "/api/v1/threads/:id/state",
            get(handlers::get_thread_state).post(handlers::update_thread_state),
        )
        .route("/api/v1/threads/:id/history", get(handlers::thread_history))
        // Runs
        .route(
            "/api/v1/threads/:id/runs",
            post(handlers::create_run).get(handlers::list_runs),
        )
        .route("/api/v1/threads/:id/runs/wait", post(handlers::create_run_and_wait))
        .route(
            "/api/v1/threads/:id/runs/:run_id",
            get(handlers::get_run).delete(handlers::delete_run),
        )
        .route("/api/v1/threads/:id/runs/:run_id/cancel", post(handlers::cancel_run))
        .route(
            "/api/v1/threads/:id/runs/:run_id/submit_tool_outputs",
            post(handlers::submit_tool_outputs),
        )
        .route("/api/v1/threads/:id/runs/:run_id/resume", post(handlers::resume_run))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}
