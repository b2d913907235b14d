//! Worker protocol endpoint handlers
//!
//! Workers register, keep a heartbeat, pull tasks with `/poll` and report run
//! progress with `/events`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use duragraph_core::worker::{Worker, WorkerHeartbeat, WorkerStatus};
use uuid::Uuid;

use crate::api::{
    error::{ApiError, ApiResult},
    models::{
        DeregisterWorkerResponse, HeartbeatRequest, HeartbeatResponse, ListWorkersQuery,
        ListWorkersResponse, PollRequest, PollResponse, RegisterWorkerRequest,
        RegisterWorkerResponse, WorkerEventRequest, WorkerEventResponse, WorkerStatusResponse,
    },
    routes::AppState,
};

/// POST /api/v1/workers/register
pub async fn register_worker(
    State(app_state): State<AppState>,
    Json(req): Json<RegisterWorkerRequest>,
) -> ApiResult<impl IntoResponse> {
    let worker_id = req
        .worker_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let worker = Worker::new(worker_id, req.name, req.capabilities)
        .with_graph_definitions(req.graph_definitions);
    let worker = app_state.workers.register(worker)?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterWorkerResponse::for_worker(&worker.id)),
    ))
}

/// POST /api/v1/workers/:id/heartbeat
pub async fn worker_heartbeat(
    State(app_state): State<AppState>,
    Path(worker_id): Path<String>,
    Json(req): Json<HeartbeatRequest>,
) -> ApiResult<impl IntoResponse> {
    let status: WorkerStatus = req.status.parse()?;
    app_state.workers.heartbeat(
        &worker_id,
        WorkerHeartbeat {
            status,
            active_runs: req.active_runs,
            total_runs: req.total_runs,
            failed_runs: req.failed_runs,
        },
    )?;
    Ok(Json(HeartbeatResponse { acknowledged: true }))
}

/// POST /api/v1/workers/:id/poll
pub async fn poll_tasks(
    State(app_state): State<AppState>,
    Path(worker_id): Path<String>,
    body: Option<Json<PollRequest>>,
) -> ApiResult<impl IntoResponse> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let tasks = app_state.workers.poll_tasks(&worker_id, req.max_tasks)?;
    Ok(Json(PollResponse { tasks }))
}

/// POST /api/v1/workers/:id/events
pub async fn worker_event(
    State(app_state): State<AppState>,
    Path(worker_id): Path<String>,
    Json(req): Json<WorkerEventRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.run_id.trim().is_empty() {
        return Err(ApiError::BadRequest("run_id is required".to_string()));
    }
    let run = app_state
        .workers
        .handle_event(&worker_id, &req.run_id, &req.event_type, req.node_id, req.data)
        .await?;
    Ok(Json(WorkerEventResponse {
        received: true,
        run_status: run.status,
    }))
}

/// POST /api/v1/workers/:id/deregister
pub async fn deregister_worker(
    State(app_state): State<AppState>,
    Path(worker_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let deregistered = app_state.workers.deregister(&worker_id);
    Ok(Json(DeregisterWorkerResponse {
        worker_id,
        deregistered,
    }))
}

/// GET /api/v1/workers?healthy=true
pub async fn list_workers(
    State(app_state): State<AppState>,
    Query(query): Query<ListWorkersQuery>,
) -> ApiResult<impl IntoResponse> {
    let threshold = app_state.workers.heartbeat_threshold();
    let workers: Vec<_> = app_state
        .workers
        .list_workers(query.healthy.unwrap_or(false))
        .into_iter()
        .map(|w| {
            let healthy = w.is_healthy(threshold);
            WorkerStatusResponse::new(w, healthy)
        })
        .collect();
    let total = workers.len();
    Ok(Json(ListWorkersResponse { workers, total }))
}

/// GET /api/v1/workers/:id
pub async fn get_worker(
    State(app_state): State<AppState>,
    Path(worker_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let worker = app_state.workers.get_worker(&worker_id)?;
    let healthy = worker.is_healthy(app_state.workers.heartbeat_threshold());
    Ok(Json(WorkerStatusResponse::new(worker, healthy)))
}

/// GET /api/v1/workers/graphs/:graph_id
pub async fn get_worker_graph(
    State(app_state): State<AppState>,
    Path(graph_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let definition = app_state.workers.graph_definition(&graph_id)?;
    Ok(Json(definition))
}
