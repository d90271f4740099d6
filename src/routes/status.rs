use axum::extract::{Path, State};
use axum::Json;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::SharedState;

/// Final delivery status of a submission, while its record is retained.
pub async fn get_status(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let status = state.statuses.get_status(id).await?.ok_or_else(|| {
        AppError::NotFound("No status recorded (not processed yet, or expired)".to_string())
    })?;

    Ok(Json(json!({ "id": id, "status": status })))
}
