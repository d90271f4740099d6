use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::AppError;
use crate::state::SharedState;
use crate::submission::parser;

/// Accept a form submission and queue it for delivery. Responds as soon as
/// the submission is queued.
pub async fn submit(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok());

    let fields = parser::parse_body(content_type, &body).map_err(AppError::BadRequest)?;

    let submission = state.intake.submit(fields).await?;

    tracing::info!("Accepted submission {}", submission.id());

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "accepted",
            "message": "Form submission queued for processing",
            "id": submission.id(),
        })),
    )
        .into_response())
}
