//! HTTP endpoints for clipsync-relay.
//!
//! Serves the signaling WebSocket endpoint plus health and metrics.

pub mod health;
mod metrics;

use crate::protocol::ws_handler;
use crate::server::SignalingRelay;
use axum::{routing::get, Extension, Router};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(relay: Arc<SignalingRelay>) -> Router {
    let config = relay.config();
    let mut router = Router::new()
        .route(&config.server.ws_path, get(ws_handler))
        .route("/health", get(health::health_handler));
    if config.http.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }
    router.layer(Extension(relay))
}

/// Serve the relay on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, relay: Arc<SignalingRelay>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, build_router(relay))
        .with_graceful_shutdown(shutdown)
        .await
}
