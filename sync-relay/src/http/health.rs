//! Health check endpoint.

use crate::server::SignalingRelay;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Overall status.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Number of registered peers.
    pub peers: usize,
    /// Number of non-empty rooms.
    pub rooms: usize,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

/// Health check handler.
pub async fn health_handler(Extension(relay): Extension<Arc<SignalingRelay>>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        peers: relay.hub().peer_count().await,
        rooms: relay.hub().room_count().await,
        uptime_seconds: relay.uptime().as_secs(),
    })
}
