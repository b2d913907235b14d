//! Run endpoint handlers
//!
//! Runs are created queued and started in the background; `/runs/wait` blocks
//! until the run is terminal or waiting for input.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::time::Duration;

use crate::api::{
    error::ApiResult,
    models::{
        CancelRunRequest, CreateRunRequest, ResumeRunRequest, RunResponse,
        SubmitToolOutputsRequest,
    },
    routes::AppState,
};

const CANCELLED_BY_USER: &str = "cancelled by user";

/// Create a run and start it
///
/// POST /api/v1/threads/:id/runs
pub async fn create_run(
    State(app_state): State<AppState>,
    Path(thread_id): Path<String>,
    Json(req): Json<CreateRunRequest>,
) -> ApiResult<impl IntoResponse> {
    let run = app_state.runs.create_run(req.into_new_run(&thread_id)).await?;
    app_state.runs.start_run(&run.id).await?;
    Ok((StatusCode::CREATED, Json(RunResponse::from(run))))
}

/// Create a run and wait for it to settle
///
/// POST /api/v1/threads/:id/runs/wait
pub async fn create_run_and_wait(
    State(app_state): State<AppState>,
    Path(thread_id): Path<String>,
    Json(req): Json<CreateRunRequest>,
) -> ApiResult<impl IntoResponse> {
    let timeout = req.timeout_secs.map(Duration::from_secs);
    let run = app_state
        .runs
        .create_and_wait_for_run(req.into_new_run(&thread_id), timeout)
        .await?;
    Ok(Json(RunResponse::from(run)))
}

/// GET /api/v1/threads/:id/runs
pub async fn list_runs(
    State(app_state): State<AppState>,
    Path(thread_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let runs = app_state.runs.list_runs(&thread_id).await?;
    Ok(Json(runs.into_iter().map(RunResponse::from).collect::<Vec<_>>()))
}

/// GET /api/v1/threads/:id/runs/:run_id
pub async fn get_run(
    State(app_state): State<AppState>,
    Path((thread_id, run_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let run = app_state.runs.get_run(&thread_id, &run_id).await?;
    Ok(Json(RunResponse::from(run)))
}

/// DELETE /api/v1/threads/:id/runs/:run_id
pub async fn delete_run(
    State(app_state): State<AppState>,
    Path((thread_id, run_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    app_state.runs.delete_run(&thread_id, &run_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/threads/:id/runs/:run_id/cancel
pub async fn cancel_run(
    State(app_state): State<AppState>,
    Path((thread_id, run_id)): Path<(String, String)>,
    body: Option<Json<CancelRunRequest>>,
) -> ApiResult<impl IntoResponse> {
    app_state.runs.get_run(&thread_id, &run_id).await?;
    let reason = body
        .and_then(|Json(req)| req.reason)
        .unwrap_or_else(|| CANCELLED_BY_USER.to_string());
    let run = app_state.runs.cancel_run(&run_id, &reason).await?;
    Ok(Json(RunResponse::from(run)))
}

/// Resolve the pending interrupt with tool outputs and continue
///
/// POST /api/v1/threads/:id/runs/:run_id/submit_tool_outputs
pub async fn submit_tool_outputs(
    State(app_state): State<AppState>,
    Path((thread_id, run_id)): Path<(String, String)>,
    Json(req): Json<SubmitToolOutputsRequest>,
) -> ApiResult<impl IntoResponse> {
    app_state.runs.get_run(&thread_id, &run_id).await?;
    let run = app_state
        .runs
        .submit_tool_outputs(&run_id, req.tool_outputs)
        .await?;
    Ok(Json(RunResponse::from(run)))
}

/// Resolve the pending interrupt with free-form input and continue
///
/// POST /api/v1/threads/:id/runs/:run_id/resume
pub async fn resume_run(
    State(app_state): State<AppState>,
    Path((thread_id, run_id)): Path<(String, String)>,
    body: Option<Json<ResumeRunRequest>>,
) -> ApiResult<impl IntoResponse> {
    app_state.runs.get_run(&thread_id, &run_id).await?;
    let req = body.map(|Json(req)| req).unwrap_or_default();
    if let Some(update) = req.update {
        app_state.runs.update_state_before_resume(&run_id, update).await?;
    }
    let run = app_state.runs.resume_run_with_input(&run_id, req.input).await?;
    Ok(Json(RunResponse::from(run)))
}
