pub mod audit;
pub mod config;
pub mod error;
pub mod intake;
pub mod middleware;
pub mod models;
pub mod queue;
pub mod routes;
pub mod shutdown;
pub mod sink;
pub mod state;
pub mod status;
pub mod submission;
pub mod worker;

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::intake::Intake;
use crate::state::{AppState, SharedState};
use crate::status::StatusStore;

pub fn build_app(config: Config, intake: Intake, statuses: Arc<dyn StatusStore>) -> Router {
    let max_body_size = config.max_body_size;

    let state: SharedState = Arc::new(AppState {
        config,
        intake,
        statuses,
    });

    Router::new()
        .merge(routes::submit_routes(state.clone()))
        .merge(routes::status_routes())
        .route("/health", axum::routing::get(health))
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
