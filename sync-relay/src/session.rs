//! Per-connection relay session.
//!
//! A RelaySession sits between one socket and the hub. It resolves the room,
//! drops frames that are oversized or over the rate limit, and hands the rest
//! to [`RoomHub::handle_connection`](crate::hub::RoomHub::handle_connection).

use crate::error::RelayError;
use crate::hub::{ConnectionHandle, Frame};
use crate::limits::ConnectionLimiter;
use crate::server::SignalingRelay;
use futures_util::{future, Stream, StreamExt};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use sync_types::{PeerId, RoomId};

/// A per-connection session.
pub struct RelaySession {
    relay: Arc<SignalingRelay>,
    room: RoomId,
    peer: PeerId,
    limiter: ConnectionLimiter,
}

impl RelaySession {
    /// Create a session for a connection that asked for `room` as `peer`.
    pub fn new(relay: Arc<SignalingRelay>, room: &str, peer: &str) -> Self {
        relay
            .metrics()
            .connections_total
            .fetch_add(1, Ordering::Relaxed);
        Self {
            room: relay.room_for(room),
            peer: PeerId::new(peer),
            limiter: relay.rate_limits().connection_limiter(),
            relay,
        }
    }

    /// Room this session belongs to.
    pub fn room(&self) -> &RoomId {
        &self.room
    }

    /// Peer id this session registers as.
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Decide whether an inbound frame is relayed.
    pub fn admit(&self, frame: &Frame) -> bool {
        let max = self.relay.config().limits.max_message_bytes;
        if frame.len() > max {
            tracing::warn!(
                room = %self.room,
                peer = %self.peer,
                size = frame.len(),
                max,
                "dropping oversized message"
            );
            self.relay
                .metrics()
                .oversize_dropped
                .fetch_add(1, Ordering::Relaxed);
            return false;
        }
        if let Err(e) = self.limiter.check() {
            tracing::warn!(room = %self.room, peer = %self.peer, "dropping message: {}", e);
            self.relay
                .metrics()
                .rate_limit_hits
                .fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    /// Run the session until `inbound` ends.
    pub async fn run<S>(self, handle: ConnectionHandle, inbound: S) -> Result<(), RelayError>
    where
        S: Stream<Item = Frame> + Unpin,
    {
        tracing::info!(room = %self.room, peer = %self.peer, "new connection");
        let admitted = inbound.filter(|frame| future::ready(self.admit(frame)));
        self.relay
            .hub()
            .handle_connection(self.room.clone(), self.peer.clone(), handle, admitted)
            .await
    }
}
