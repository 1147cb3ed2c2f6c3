//! # sync-relay
//!
//! Room-based signaling relay for clipsync.
//!
//! This crate implements a relay server that:
//! - Accepts WebSocket connections tagged with a room and a peer id
//! - Relays signaling envelopes to one addressed peer or to the whole room
//! - Forgets a peer as soon as its connection ends
//! - Never sees clipboard content or key material
//!
//! ## Architecture
//!
//! ```text
//! Peer A ──┐                          ┌── Peer B
//!          │   WebSocket (signaling)  │
//!          ├─────────────────────────►│
//!          │                          │
//!      ┌───┴──────────────────────────┴───┐
//!      │          clipsync-relay          │
//!      │  ┌────────────────────────────┐  │
//!      │  │ RoomHub: room -> peer -> ws │  │
//!      │  └────────────────────────────┘  │
//!      └──────────────────────────────────┘
//!
//! Peer A ◄══════ direct encrypted link ══════► Peer B
//! ```
//!
//! ## Protocol
//!
//! Clients connect to `/ws?room=<room>&peer_id=<id>` and exchange
//! join / leave / offer / answer / candidate envelopes. Envelopes with a
//! `to` field go to that peer only; everything else (including frames that
//! fail to parse) goes to every other member of the room.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod http;
pub mod hub;
pub mod limits;
pub mod protocol;
pub mod server;
pub mod session;

pub use hub::{ConnectionHandle, Frame, Outbox, RoomHub};
pub use server::{RelayMetrics, SignalingRelay};
pub use session::RelaySession;
