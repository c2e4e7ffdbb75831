//! HTTP transport error types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chordstream_core::{CollaboratorError, PipelineError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// HTTP transport error types
#[derive(Debug, Error)]
pub enum Error {
    /// Bind address could not be parsed
    #[error("Invalid bind address: {0}")]
    InvalidAddress(String),

    /// Server failed while running
    #[error("Server error: {0}")]
    ServerError(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for HTTP transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error response body for structured error responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error type (`input`, `not_found`, `collaborator`, `internal`)
    pub error_type: String,
    /// Human-readable error message
    pub message: String,
}

/// Handler error carrying a status code and an [`ErrorResponse`]
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, error_type: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error_type: error_type.to_string(),
                message: message.into(),
            },
        }
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "input", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &ErrorResponse {
        &self.body
    }
}

/// Map pipeline errors to appropriate HTTP status codes
impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        let message = e.to_string();
        match e {
            PipelineError::CollaboratorFailure {
                source: CollaboratorError::NotFound(_),
                ..
            } => Self::not_found(message),
            PipelineError::CollaboratorFailure {
                source: CollaboratorError::InvalidInput(_),
                ..
            } => Self::input(message),
            PipelineError::CollaboratorFailure { .. } => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, "collaborator", message)
            }
            PipelineError::WorkerAborted { .. } => Self::internal(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chordstream_core::Stage;

    #[test]
    fn test_pipeline_error_status_mapping() {
        let cases = [
            (CollaboratorError::NotFound("a.wav".into()), StatusCode::NOT_FOUND, "not_found"),
            (CollaboratorError::InvalidInput("bad".into()), StatusCode::BAD_REQUEST, "input"),
            (
                CollaboratorError::Failed("boom".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
                "collaborator",
            ),
        ];
        for (source, status, error_type) in cases {
            let err = ApiError::from(PipelineError::CollaboratorFailure {
                stage: Stage::Decode,
                source,
            });
            assert_eq!(err.status(), status);
            assert_eq!(err.body().error_type, error_type);
        }

        let err = ApiError::from(PipelineError::WorkerAborted {
            stage: Stage::SuggestChords,
            message: "panicked".into(),
        });
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.body().error_type, "internal");
    }
}
