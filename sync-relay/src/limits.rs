//! Rate limiting for clipsync-relay.
//!
//! Protects the relay against signaling spam.
//!
//! ## Design Notes
//!
//! Peer ids are chosen by clients and are not authenticated, so limiting by
//! peer id would let a client dodge its quota by reconnecting under a fresh
//! name. Instead every accepted connection gets its own limiter, and a
//! global limiter caps aggregate throughput across all connections.
//!
//! A rate-limited message is dropped; the connection stays open.

use crate::config::{ConfigError, LimitsConfig};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Type alias for a direct (non-keyed) rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiters for the relay server.
#[derive(Clone)]
pub struct RateLimits {
    /// Quota handed to every new connection.
    connection_quota: Quota,

    /// Global rate limiter across all connections.
    global_limiter: Arc<DirectLimiter>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("connection_quota", &self.connection_quota)
            .field("global_limiter", &"DirectLimiter")
            .finish()
    }
}

impl RateLimits {
    /// Create rate limiters from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a configured rate is zero.
    pub fn new(config: &LimitsConfig) -> Result<Self, ConfigError> {
        let per_minute = NonZeroU32::new(config.messages_per_minute).ok_or_else(|| {
            ConfigError::Invalid("limits.messages_per_minute must be > 0".into())
        })?;
        let global_rps = NonZeroU32::new(config.global_messages_per_second).ok_or_else(|| {
            ConfigError::Invalid("limits.global_messages_per_second must be > 0".into())
        })?;

        Ok(Self {
            connection_quota: Quota::per_minute(per_minute),
            global_limiter: Arc::new(RateLimiter::direct(Quota::per_second(global_rps))),
        })
    }

    /// Create the limiter for one newly accepted connection.
    pub fn connection_limiter(&self) -> ConnectionLimiter {
        ConnectionLimiter {
            limiter: RateLimiter::direct(self.connection_quota),
            global: Arc::clone(&self.global_limiter),
        }
    }

    /// Check if the global message rate is within limits.
    pub fn check_global(&self) -> Result<(), RateLimitError> {
        self.global_limiter
            .check()
            .map_err(|_| RateLimitError::GlobalLimitExceeded)
    }
}

/// Per-connection message limiter, also charged against the global quota.
pub struct ConnectionLimiter {
    limiter: DirectLimiter,
    global: Arc<DirectLimiter>,
}

impl ConnectionLimiter {
    /// Check if one more message from this connection is allowed.
    pub fn check(&self) -> Result<(), RateLimitError> {
        self.limiter
            .check()
            .map_err(|_| RateLimitError::MessageLimitExceeded)?;
        self.global
            .check()
            .map_err(|_| RateLimitError::GlobalLimitExceeded)
    }
}

impl std::fmt::Debug for ConnectionLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLimiter").finish_non_exhaustive()
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    /// Too many messages from this connection.
    MessageLimitExceeded,
    /// Global message rate exceeded across all connections.
    GlobalLimitExceeded,
}

impl std::fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MessageLimitExceeded => {
                write!(f, "message rate limit exceeded")
            }
            Self::GlobalLimitExceeded => {
                write!(f, "global rate limit exceeded")
            }
        }
    }
}

impl std::error::Error for RateLimitError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(per_minute: u32, global: u32) -> LimitsConfig {
        LimitsConfig {
            messages_per_minute: per_minute,
            global_messages_per_second: global,
            ..LimitsConfig::default()
        }
    }

    #[test]
    fn zero_rate_is_config_error() {
        assert!(RateLimits::new(&config(0, 10)).is_err());
        assert!(RateLimits::new(&config(10, 0)).is_err());
    }

    #[test]
    fn connection_limit_allows_within_quota() {
        let limits = RateLimits::new(&config(5, 1000)).unwrap();
        let conn = limits.connection_limiter();

        // First 5 should succeed
        for _ in 0..5 {
            assert!(conn.check().is_ok());
        }

        // 6th should fail
        assert_eq!(conn.check(), Err(RateLimitError::MessageLimitExceeded));
    }

    #[test]
    fn connections_have_independent_limits() {
        let limits = RateLimits::new(&config(2, 1000)).unwrap();
        let a = limits.connection_limiter();
        let b = limits.connection_limiter();

        // Connection A uses its quota
        assert!(a.check().is_ok());
        assert!(a.check().is_ok());
        assert!(a.check().is_err());

        // Connection B still has full quota
        assert!(b.check().is_ok());
        assert!(b.check().is_ok());
        assert!(b.check().is_err());
    }

    #[test]
    fn global_rate_limiter_rejects_excess() {
        let limits = RateLimits::new(&config(1000, 5)).unwrap();
        let a = limits.connection_limiter();
        let b = limits.connection_limiter();

        for _ in 0..3 {
            assert!(a.check().is_ok());
        }
        for _ in 0..2 {
            assert!(b.check().is_ok());
        }

        assert_eq!(b.check(), Err(RateLimitError::GlobalLimitExceeded));
        assert_eq!(limits.check_global(), Err(RateLimitError::GlobalLimitExceeded));
    }

    #[test]
    fn rate_limits_are_debug() {
        let limits = RateLimits::new(&LimitsConfig::default()).unwrap();
        let debug = format!("{:?}", limits);
        assert!(debug.contains("RateLimits"));
    }

    #[test]
    fn rate_limit_error_display() {
        assert_eq!(
            RateLimitError::MessageLimitExceeded.to_string(),
            "message rate limit exceeded"
        );
        assert_eq!(
            RateLimitError::GlobalLimitExceeded.to_string(),
            "global rate limit exceeded"
        );
    }
}
