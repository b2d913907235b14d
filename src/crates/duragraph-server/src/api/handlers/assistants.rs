//! Assistant endpoint handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::api::{
    error::ApiResult,
    models::{AssistantResponse, CreateAssistantRequest},
    routes::AppState,
};
use crate::services::CreateAssistant;

/// Create an assistant, optionally with an inline graph
///
/// POST /api/v1/assistants
pub async fn create_assistant(
    State(app_state): State<AppState>,
    Json(req): Json<CreateAssistantRequest>,
) -> ApiResult<impl IntoResponse> {
    let (assistant, _) = app_state
        .assistants
        .create(CreateAssistant {
            assistant_id: req.assistant_id,
            name: req.name,
            description: req.description,
            metadata: req.metadata,
            config: req.config,
            graph: req.graph,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(AssistantResponse::from(assistant))))
}

/// GET /api/v1/assistants
pub async fn list_assistants(State(app_state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let assistants = app_state.assistants.list().await?;
    Ok(Json(
        assistants
            .into_iter()
            .map(AssistantResponse::from)
            .collect::<Vec<_>>(),
    ))
}

/// GET /api/v1/assistants/:id
pub async fn get_assistant(
    State(app_state): State<AppState>,
    Path(assistant_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let assistant = app_state.assistants.get(&assistant_id).await?;
    Ok(Json(AssistantResponse::from(assistant)))
}
