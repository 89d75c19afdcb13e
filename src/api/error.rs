use crate::orchestrator::OrchestratorError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::error;

const UNAVAILABLE_MESSAGE: &str = "service temporarily unavailable";
const INTERNAL_MESSAGE: &str = "internal server error";

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// API error type
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    UnprocessableEntity(String),
    ServiceUnavailable,
    InternalServerError,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::UnprocessableEntity(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::ServiceUnavailable => {
                (StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE_MESSAGE.to_string())
            }
            AppError::InternalServerError => {
                (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MESSAGE.to_string())
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

impl From<OrchestratorError> for AppError {
    fn from(e: OrchestratorError) -> Self {
        // Infrastructure detail stays in the logs
        if e.is_infrastructure() {
            error!(error = %e, "Request failed");
        }
        match e {
            OrchestratorError::Validation(msg) => AppError::BadRequest(msg),
            OrchestratorError::InsufficientScope(msg) => AppError::Forbidden(msg),
            OrchestratorError::MissingCredential(msg) => AppError::NotFound(msg),
            OrchestratorError::InvalidToken(msg) => AppError::UnprocessableEntity(msg),
            OrchestratorError::ProviderUnavailable(_)
            | OrchestratorError::EventBusUnavailable(_) => AppError::ServiceUnavailable,
            OrchestratorError::Storage(_) => AppError::InternalServerError,
        }
    }
}
