use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::intake::IntakeError;
use crate::status::StatusError;

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    Forbidden(String),
    BadRequest(String),
    Intake(IntakeError),
    Status(StatusError),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "Not Found: {msg}"),
            AppError::Forbidden(msg) => write!(f, "Forbidden: {msg}"),
            AppError::BadRequest(msg) => write!(f, "Bad Request: {msg}"),
            AppError::Intake(err) => write!(f, "Intake Error: {err}"),
            AppError::Status(err) => write!(f, "Status Store Error: {err}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Intake(err) => {
                tracing::error!("Intake error: {err}");
                let message = match err {
                    IntakeError::Audit(_) => "Failed to log submission",
                    _ => "Failed to queue submission",
                };
                (StatusCode::INTERNAL_SERVER_ERROR, message.to_string())
            }
            AppError::Status(err) => {
                tracing::error!("Status store error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<IntakeError> for AppError {
    fn from(err: IntakeError) -> Self {
        AppError::Intake(err)
    }
}

impl From<StatusError> for AppError {
    fn from(err: StatusError) -> Self {
        AppError::Status(err)
    }
}
