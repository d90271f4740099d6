pub mod status;
pub mod submit;

use axum::routing::{get, post};
use axum::Router;

use crate::middleware::allowlist;
use crate::state::SharedState;

pub fn submit_routes(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/submit", post(submit::submit))
        .layer(axum::middleware::from_fn_with_state(state, allowlist::enforce))
}

pub fn status_routes() -> Router<SharedState> {
    Router::new().route("/status/{id}", get(status::get_status))
}
