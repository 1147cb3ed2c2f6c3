//! # sync-core
//!
//! Pure logic for clipsync (no I/O, instant tests).
//!
//! This crate implements the peer session state machine and the clipboard
//! echo filter without any network, clipboard or async I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (signaling, peer links, clipboard) is performed by
//! `sync-client`, which interprets the actions produced by these state machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod echo;
pub mod state;

pub use echo::EchoFilter;
pub use state::{
    offer_disposition, Action, CloseReason, Event, OfferDisposition, Role, SessionEvent,
    SessionState,
};
