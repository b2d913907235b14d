//! Thread and thread state endpoint handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::api::{
    error::ApiResult,
    models::{
        CopyThreadRequest, CreateThreadRequest, HistoryParams, MessageInput, ThreadResponse,
        ThreadStateQuery, UpdateThreadStateRequest,
    },
    routes::AppState,
};

/// Create a thread, seeding it with any given messages
///
/// POST /api/v1/threads
pub async fn create_thread(
    State(app_state): State<AppState>,
    body: Option<Json<CreateThreadRequest>>,
) -> ApiResult<impl IntoResponse> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let thread = app_state.threads.create_thread(req.metadata).await?;
    for message in req.messages {
        app_state
            .threads
            .add_message(&thread.id, &message.role, &message.content, message.metadata)
            .await?;
    }
    let thread = app_state.threads.get_thread(&thread.id).await?;
    Ok((StatusCode::CREATED, Json(ThreadResponse::from(thread))))
}

/// GET /api/v1/threads/:id
pub async fn get_thread(
    State(app_state): State<AppState>,
    Path(thread_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let thread = app_state.threads.get_thread(&thread_id).await?;
    Ok(Json(ThreadResponse::from(thread)))
}

/// DELETE /api/v1/threads/:id
pub async fn delete_thread(
    State(app_state): State<AppState>,
    Path(thread_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    app_state.threads.delete_thread(&thread_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Fork a thread at its latest or a given checkpoint
///
/// POST /api/v1/threads/:id/copy
pub async fn copy_thread(
    State(app_state): State<AppState>,
    Path(thread_id): Path<String>,
    body: Option<Json<CopyThreadRequest>>,
) -> ApiResult<impl IntoResponse> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let copy = app_state
        .threads
        .copy_thread(&thread_id, req.checkpoint_id.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(ThreadResponse::from(copy))))
}

/// POST /api/v1/threads/:id/messages
pub async fn add_message(
    State(app_state): State<AppState>,
    Path(thread_id): Path<String>,
    Json(req): Json<MessageInput>,
) -> ApiResult<impl IntoResponse> {
    let message = app_state
        .threads
        .add_message(&thread_id, &req.role, &req.content, req.metadata)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /api/v1/threads/:id/state
pub async fn get_thread_state(
    State(app_state): State<AppState>,
    Path(thread_id): Path<String>,
    Query(query): Query<ThreadStateQuery>,
) -> ApiResult<impl IntoResponse> {
    let state = app_state
        .threads
        .get_state(&thread_id, query.checkpoint_id.as_deref())
        .await?;
    Ok(Json(state))
}

/// Merge values into the thread state as a new checkpoint
///
/// POST /api/v1/threads/:id/state
pub async fn update_thread_state(
    State(app_state): State<AppState>,
    Path(thread_id): Path<String>,
    Json(req): Json<UpdateThreadStateRequest>,
) -> ApiResult<impl IntoResponse> {
    let state = app_state
        .threads
        .update_state(&thread_id, req.values, req.as_node.as_deref())
        .await?;
    Ok(Json(state))
}

/// GET /api/v1/threads/:id/history
pub async fn thread_history(
    State(app_state): State<AppState>,
    Path(thread_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<impl IntoResponse> {
    let history = app_state
        .threads
        .history(&thread_id, params.limit, params.before)
        .await?;
    Ok(Json(history))
}
