//! # sync-types
//!
//! Wire format types for the clipsync signaling protocol.
//!
//! This crate provides the foundational types shared by the relay and the client:
//! - [`PeerId`], [`RoomId`] - Addressing types
//! - [`SignalingEnvelope`] - The signaling message (join, leave, offer, answer, candidate)
//! - [`SyncError`] - Codec errors
//!
//! Signaling envelopes carry discovery and negotiation metadata only. Clipboard
//! content never travels over the signaling path.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod ids;

pub use envelope::{EnvelopeType, SignalingEnvelope};
pub use error::SyncError;
pub use ids::{PeerId, RoomId, DEFAULT_ROOM};
