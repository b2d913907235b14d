//! API error types and HTTP response conversion
//!
//! Domain errors keep their own classification; this module only picks the
//! status code and renders the `{error, message, code}` body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use duragraph_core::error::DomainError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// API error response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// Error type identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
    /// Error code for programmatic handling
    pub code: String,
}

impl ApiErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            code: code.into(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Request could not be interpreted
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Domain(err) => match err {
                DomainError::InvalidInput { .. }
                | DomainError::Serialization(_)
                | DomainError::Yaml(_) => StatusCode::BAD_REQUEST,
                DomainError::NotFound { .. } => StatusCode::NOT_FOUND,
                DomainError::InvalidState { .. }
                | DomainError::AlreadyExists { .. }
                | DomainError::Conflict(_) => StatusCode::CONFLICT,
                DomainError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                err if err.is_not_found() => StatusCode::NOT_FOUND,
                err if err.is_conflict() => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Domain(err) => err.code(),
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self.status_code() {
            StatusCode::BAD_REQUEST => "BadRequest",
            StatusCode::NOT_FOUND => "NotFound",
            StatusCode::CONFLICT => "Conflict",
            StatusCode::GATEWAY_TIMEOUT => "Timeout",
            _ => "InternalError",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ApiErrorResponse::new(self.error_type(), self.to_string(), self.code());

        if status.is_server_error() {
            tracing::error!(code = %body.code, "request failed: {}", body.message);
        } else {
            tracing::debug!(code = %body.code, status = %status, "request rejected: {}", body.message);
        }

        (status, Json(body)).into_response()
    }
}
