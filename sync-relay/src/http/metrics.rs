//! Prometheus metrics endpoint.

use crate::server::SignalingRelay;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format.
/// Includes both gauges (current state) and counters (monotonic since startup).
pub async fn metrics_handler(Extension(relay): Extension<Arc<SignalingRelay>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        render(&relay).await,
    )
}

async fn render(relay: &SignalingRelay) -> String {
    let m = relay.metrics();

    // Gauges: current state
    let peers = relay.hub().peer_count().await;
    let rooms = relay.hub().room_count().await;

    // Counters: monotonic since startup
    let conns_total = m.connections_total.load(Ordering::Relaxed);
    let rejected = m.rejected_connections.load(Ordering::Relaxed);
    let relayed = m.messages_relayed.load(Ordering::Relaxed);
    let targeted = m.targeted_deliveries.load(Ordering::Relaxed);
    let broadcast = m.broadcast_deliveries.load(Ordering::Relaxed);
    let fallbacks = m.parse_fallbacks.load(Ordering::Relaxed);
    let write_failures = m.write_failures.load(Ordering::Relaxed);
    let rate_limits = m.rate_limit_hits.load(Ordering::Relaxed);
    let oversize = m.oversize_dropped.load(Ordering::Relaxed);

    format!(
        r#"# HELP clipsync_relay_peers_active Number of registered peers
# TYPE clipsync_relay_peers_active gauge
clipsync_relay_peers_active {peers}

# HELP clipsync_relay_rooms_active Number of non-empty rooms
# TYPE clipsync_relay_rooms_active gauge
clipsync_relay_rooms_active {rooms}

# HELP clipsync_relay_info Server information
# TYPE clipsync_relay_info gauge
clipsync_relay_info{{version="{version}"}} 1

# HELP clipsync_relay_connections_total Total connections accepted
# TYPE clipsync_relay_connections_total counter
clipsync_relay_connections_total {conns_total}

# HELP clipsync_relay_rejected_connections_total Connections closed for lacking a peer id
# TYPE clipsync_relay_rejected_connections_total counter
clipsync_relay_rejected_connections_total {rejected}

# HELP clipsync_relay_messages_total Total signaling messages relayed
# TYPE clipsync_relay_messages_total counter
clipsync_relay_messages_total {relayed}

# HELP clipsync_relay_targeted_deliveries_total Messages delivered to an addressed peer
# TYPE clipsync_relay_targeted_deliveries_total counter
clipsync_relay_targeted_deliveries_total {targeted}

# HELP clipsync_relay_broadcast_deliveries_total Per-recipient broadcast deliveries
# TYPE clipsync_relay_broadcast_deliveries_total counter
clipsync_relay_broadcast_deliveries_total {broadcast}

# HELP clipsync_relay_parse_fallbacks_total Unparseable messages broadcast to the room
# TYPE clipsync_relay_parse_fallbacks_total counter
clipsync_relay_parse_fallbacks_total {fallbacks}

# HELP clipsync_relay_write_failures_total Failed writes that disconnected a peer
# TYPE clipsync_relay_write_failures_total counter
clipsync_relay_write_failures_total {write_failures}

# HELP clipsync_relay_rate_limit_hits_total Messages dropped by rate limiting
# TYPE clipsync_relay_rate_limit_hits_total counter
clipsync_relay_rate_limit_hits_total {rate_limits}

# HELP clipsync_relay_oversize_dropped_total Messages dropped for exceeding the size limit
# TYPE clipsync_relay_oversize_dropped_total counter
clipsync_relay_oversize_dropped_total {oversize}
"#,
        version = env!("CARGO_PKG_VERSION"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn renders_gauges_and_counters() {
        let relay = SignalingRelay::new(Config::default()).unwrap();
        relay.metrics().parse_fallbacks.fetch_add(3, Ordering::Relaxed);

        let body = render(&relay).await;
        assert!(body.contains("# TYPE clipsync_relay_peers_active gauge"));
        assert!(body.contains("clipsync_relay_peers_active 0"));
        assert!(body.contains("clipsync_relay_parse_fallbacks_total 3"));
    }
}
