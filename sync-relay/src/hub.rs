//! RoomHub - room membership and signaling relay.
//!
//! The hub maps `room -> peer id -> connection handle` and relays every
//! inbound frame either to its addressed target or to the rest of the room.
//! It never looks at anything but the envelope header; payloads pass through
//! untouched and no clipboard data ever reaches it.
//!
//! All membership changes and every relay pass run under one lock, so a
//! broadcast never observes a half-updated room.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use sync_types::{PeerId, RoomId};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{RelayError, Result};
use crate::server::RelayMetrics;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// The only part of an envelope the hub routes on.
///
/// Type and sender are not checked here, so envelope kinds the relay does
/// not know still reach their addressee.
#[derive(Debug, Deserialize)]
struct RouteHeader {
    #[serde(default)]
    to: Option<String>,
}

impl RouteHeader {
    fn parse(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    fn target(self) -> Option<PeerId> {
        self.to.filter(|to| !to.is_empty()).map(PeerId::new)
    }
}

/// One signaling message as it arrived on the socket.
///
/// The relay forwards frames with the type they arrived with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl Frame {
    /// Raw bytes of the frame.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Frame size in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// True for a zero-length frame.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The hub's handle on one live connection.
///
/// Writing is an enqueue onto the connection's outbox; it fails once the
/// connection's writer is gone, which the hub treats as a disconnect.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: u64,
    outbox: mpsc::UnboundedSender<Frame>,
    closed: CancellationToken,
}

/// Receiving end of a [`ConnectionHandle`], drained by the connection's writer.
#[derive(Debug)]
pub struct Outbox {
    /// Frames to write to the socket, in order.
    pub frames: mpsc::UnboundedReceiver<Frame>,
    /// Cancelled when the hub closes the connection.
    pub closed: CancellationToken,
}

impl ConnectionHandle {
    /// Create a handle and the outbox its writer drains.
    pub fn new() -> (Self, Outbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();
        let handle = Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            outbox: tx,
            closed: closed.clone(),
        };
        (
            handle,
            Outbox {
                frames: rx,
                closed,
            },
        )
    }

    /// Unique id of this connection.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a frame for the writer.
    pub fn send(&self, frame: Frame) -> std::result::Result<(), Frame> {
        if self.closed.is_cancelled() {
            return Err(frame);
        }
        self.outbox.send(frame).map_err(|e| e.0)
    }

    /// Ask the writer to close the socket.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// True once closed by the hub or the writer.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.outbox.is_closed()
    }
}

type Rooms = HashMap<RoomId, HashMap<PeerId, ConnectionHandle>>;

/// Room table plus relay logic.
#[derive(Debug, Default)]
pub struct RoomHub {
    rooms: Mutex<Rooms>,
    metrics: Arc<RelayMetrics>,
}

impl RoomHub {
    /// Create an empty hub with its own metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty hub that reports into `metrics`.
    pub fn with_metrics(metrics: Arc<RelayMetrics>) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Counters updated by this hub.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Serve one connection until `inbound` ends.
    ///
    /// Registers `handle` under `(room, peer)`, replacing any earlier handle
    /// for the same peer id, relays every inbound frame, then deregisters.
    /// A connection with an empty peer id is closed at once.
    pub async fn handle_connection<S>(
        &self,
        room: RoomId,
        peer: PeerId,
        handle: ConnectionHandle,
        mut inbound: S,
    ) -> Result<()>
    where
        S: Stream<Item = Frame> + Unpin,
    {
        if peer.is_empty() {
            warn!(%room, "rejecting connection without peer id");
            self.metrics
                .rejected_connections
                .fetch_add(1, Ordering::Relaxed);
            handle.close();
            return Err(RelayError::EmptyPeerId);
        }

        let id = handle.id();
        self.register(&room, &peer, handle.clone()).await;

        while let Some(frame) = inbound.next().await {
            self.broadcast(&room, &peer, frame).await;
        }

        self.deregister(&room, &peer, id).await;
        handle.close();
        Ok(())
    }

    async fn register(&self, room: &RoomId, peer: &PeerId, handle: ConnectionHandle) {
        let mut rooms = self.rooms.lock().await;
        let members = rooms.entry(room.clone()).or_default();
        if members.insert(peer.clone(), handle).is_some() {
            info!(%room, %peer, "peer reconnected, replacing previous connection");
        } else {
            info!(%room, %peer, members = members.len(), "peer joined");
        }
    }

    /// Remove `peer` from `room` if the slot still holds connection `id`.
    async fn deregister(&self, room: &RoomId, peer: &PeerId, id: u64) {
        let mut rooms = self.rooms.lock().await;
        let Some(members) = rooms.get_mut(room) else {
            return;
        };
        if members.get(peer).map(|h| h.id()) != Some(id) {
            debug!(%room, %peer, "slot taken by a newer connection");
            return;
        }
        members.remove(peer);
        info!(%room, %peer, remaining = members.len(), "peer left");
        if members.is_empty() {
            rooms.remove(room);
            debug!(%room, "room removed");
        }
    }

    /// Relay one frame from `sender` within `room`.
    ///
    /// A parsed envelope with a target goes to that peer only. Anything else,
    /// including frames that fail to parse, goes to every other member.
    pub async fn broadcast(&self, room: &RoomId, sender: &PeerId, frame: Frame) {
        self.metrics.messages_relayed.fetch_add(1, Ordering::Relaxed);

        let target = match RouteHeader::parse(frame.as_bytes()) {
            Ok(header) => header.target(),
            Err(e) => {
                debug!(%room, %sender, "unparseable frame, broadcasting: {}", e);
                self.metrics.parse_fallbacks.fetch_add(1, Ordering::Relaxed);
                None
            }
        };

        let mut rooms = self.rooms.lock().await;
        let Some(members) = rooms.get_mut(room) else {
            return;
        };

        match target {
            Some(target) => {
                let Some(handle) = members.get(&target) else {
                    debug!(%room, %sender, %target, "target not in room, dropping");
                    return;
                };
                if handle.send(frame).is_ok() {
                    self.metrics
                        .targeted_deliveries
                        .fetch_add(1, Ordering::Relaxed);
                } else {
                    warn!(%room, peer = %target, "write failed, disconnecting");
                    self.metrics.write_failures.fetch_add(1, Ordering::Relaxed);
                    if let Some(handle) = members.remove(&target) {
                        handle.close();
                    }
                }
            }
            None => {
                let mut failed = Vec::new();
                for (peer, handle) in members.iter().filter(|(p, _)| *p != sender) {
                    if handle.send(frame.clone()).is_ok() {
                        self.metrics
                            .broadcast_deliveries
                            .fetch_add(1, Ordering::Relaxed);
                    } else {
                        failed.push(peer.clone());
                    }
                }
                for peer in failed {
                    warn!(%room, %peer, "write failed, disconnecting");
                    self.metrics.write_failures.fetch_add(1, Ordering::Relaxed);
                    if let Some(handle) = members.remove(&peer) {
                        handle.close();
                    }
                }
            }
        }

        if members.is_empty() {
            rooms.remove(room);
        }
    }

    /// Peer ids currently in `room`, sorted.
    pub async fn room_members(&self, room: &RoomId) -> Vec<PeerId> {
        let rooms = self.rooms.lock().await;
        let mut members: Vec<PeerId> = rooms
            .get(room)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Number of non-empty rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }

    /// Number of registered peers across all rooms.
    pub async fn peer_count(&self) -> usize {
        self.rooms.lock().await.values().map(HashMap::len).sum()
    }
}
