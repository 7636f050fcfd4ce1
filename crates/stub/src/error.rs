use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use runwatch_types::{RunId, RunStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured JSON error body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum StubError {
    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    #[error("Missing or invalid credential")]
    Unauthorized,

    #[error("Run {run_id} is {status}, not waiting for user")]
    NotWaiting { run_id: RunId, status: RunStatus },

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for StubError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            StubError::RunNotFound(id) => {
                tracing::warn!(run_id = %id, "run not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details("Run not found", format!("Run ID: {id}")),
                )
            }
            StubError::Unauthorized => {
                tracing::warn!("rejected request without a valid credential");
                (StatusCode::UNAUTHORIZED, ErrorResponse::new("Unauthorized"))
            }
            StubError::NotWaiting { run_id, status } => {
                tracing::warn!(run_id = %run_id, status = %status, "confirmation for a run that is not waiting");
                (
                    StatusCode::CONFLICT,
                    ErrorResponse::with_details("Run is not waiting for user", self.to_string()),
                )
            }
            StubError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::with_details("Bad request", message.clone()),
            ),
        };
        (status, Json(body)).into_response()
    }
}
