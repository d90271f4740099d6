use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::AppError;
use crate::state::SharedState;
use crate::submission::metadata;

/// Reject requests whose client address is outside the configured networks.
/// An empty allowlist lets everything through.
pub async fn enforce(State(state): State<SharedState>, req: Request, next: Next) -> Response {
    let allowed = &state.config.allowed_networks;
    if allowed.is_empty() {
        return next.run(req).await;
    }

    let Some(ConnectInfo(peer)) = req.extensions().get::<ConnectInfo<SocketAddr>>().copied()
    else {
        return AppError::Forbidden("Access denied: unknown client address".into()).into_response();
    };

    let ip = metadata::client_ip(req.headers(), peer.ip(), &state.config.trusted_proxies);
    if !allowed.iter().any(|net| net.contains(&ip)) {
        tracing::warn!("Rejected submission from {ip}: not in allowed networks");
        return AppError::Forbidden(format!("Access denied: {ip} is not an allowed network"))
            .into_response();
    }

    next.run(req).await
}
