//! # sync-client
//!
//! Client library for clipsync peer-to-peer clipboard sync.
//!
//! Peers find each other through a signaling relay, negotiate a direct link,
//! then exchange encrypted clipboard updates over that link. The relay never
//! sees clipboard content.
//!
//! ## Features
//!
//! - **E2E Encryption**: ChaCha20-Poly1305 with a key derived from a shared password
//! - **Echo Suppression**: remote writes never bounce back to the sender
//! - **Transport Abstraction**: pluggable signaling (WebSocket, in-memory, mock)
//! - **Link Abstraction**: pluggable peer links (TCP on the LAN, in-memory)
//! - **Pure State Machine**: per-peer sessions driven by sync-core
//!
//! ## Example
//!
//! ```ignore
//! use std::time::Duration;
//! use clipsync_client::{SyncConfig, SyncCoordinator, TcpConnector, WebSocketTransport};
//!
//! let config = SyncConfig::new("shared password", "ws://relay:8080/ws", Duration::from_secs(10));
//! let coordinator = SyncCoordinator::new(
//!     config,
//!     WebSocketTransport::new(),
//!     TcpConnector::default(),
//!     my_clipboard,
//! )?;
//! coordinator.run_until(async { tokio::signal::ctrl_c().await.ok(); }).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clipboard;
pub mod coordinator;
pub mod crypto;
pub mod peer;
mod session;
pub mod transport;

pub use clipboard::{ClipboardBackend, ClipboardChanges, ClipboardError, ClipboardGuard, MockClipboard};
pub use coordinator::{ClientError, SyncConfig, SyncCoordinator, DEFAULT_LEAVE_TIMEOUT};
pub use crypto::{CryptoBox, CryptoError, SharedKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use peer::{
    local_ipv4_addrs, MemoryNetwork, PeerConnector, PeerError, PeerEvent, PeerEvents, PeerLink,
    TcpConnector, MAX_FRAME_SIZE,
};
pub use transport::{
    memory_signaling, MemoryAccepted, MemoryDialer, MemoryListener, MemoryTransport, MockTransport,
    Transport, TransportError, WebSocketTransport,
};

pub use sync_core::{CloseReason, Role, SessionState};
pub use sync_types::{PeerId, RoomId, SignalingEnvelope};
