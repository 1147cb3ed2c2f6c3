//! Main SignalingRelay server coordination.
//!
//! SignalingRelay owns the configuration, the room hub, rate limiters and
//! metrics, and is shared by every connection handler.

use crate::config::{Config, ConfigError};
use crate::hub::RoomHub;
use crate::limits::RateLimits;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sync_types::RoomId;

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
/// Incremented through `AtomicU64` without locking.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total WebSocket connections accepted.
    pub connections_total: AtomicU64,
    /// Connections closed at once for lacking a peer id.
    pub rejected_connections: AtomicU64,
    /// Total frames handed to the hub for relay.
    pub messages_relayed: AtomicU64,
    /// Frames delivered to an addressed target.
    pub targeted_deliveries: AtomicU64,
    /// Per-recipient deliveries of broadcast frames.
    pub broadcast_deliveries: AtomicU64,
    /// Frames that failed to parse and were broadcast instead.
    pub parse_fallbacks: AtomicU64,
    /// Writes that failed and disconnected the recipient.
    pub write_failures: AtomicU64,
    /// Frames dropped by a rate limiter.
    pub rate_limit_hits: AtomicU64,
    /// Frames dropped for exceeding the size limit.
    pub oversize_dropped: AtomicU64,
}

/// Main relay server.
pub struct SignalingRelay {
    config: Config,
    hub: RoomHub,
    /// Rate limiters for inbound messages.
    rate_limits: RateLimits,
    /// Operational metrics (counters), shared with the hub.
    metrics: Arc<RelayMetrics>,
    started: Instant,
}

impl std::fmt::Debug for SignalingRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingRelay")
            .field("config", &self.config)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl SignalingRelay {
    /// Create a new relay with the given config.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let rate_limits = RateLimits::new(&config.limits)?;
        let metrics = Arc::new(RelayMetrics::default());
        Ok(Self {
            hub: RoomHub::with_metrics(Arc::clone(&metrics)),
            config,
            rate_limits,
            metrics,
            started: Instant::now(),
        })
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the room hub.
    pub fn hub(&self) -> &RoomHub {
        &self.hub
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Time since the relay was created.
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Resolve a client-supplied room name, applying the configured default.
    pub fn room_for(&self, name: &str) -> RoomId {
        RoomId::or_default(name, &self.config.server.default_room)
    }
}
