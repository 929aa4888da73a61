use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tts_core::SpeechError;

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Speech(#[from] SpeechError),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("LLM request timed out")]
    LlmTimeout,

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::InternalError(format!("{e:#}"))
    }
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Speech(e) => {
                tracing::error!(error = %e, "speech generation failed");
                (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
            ApiError::Llm(msg) => {
                tracing::error!("LLM error: {}", msg);
                (StatusCode::BAD_GATEWAY, format!("LLM error: {msg}"))
            }
            ApiError::LlmTimeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "LLM request timed out".to_string(),
            ),
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}
