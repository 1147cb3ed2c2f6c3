//! Signaling transport abstraction for clipsync.
//!
//! This module provides a pluggable transport for the signaling channel that
//! abstracts the underlying connection mechanism (WebSocket, in-memory, mock).
//!
//! # Design
//!
//! The transport trait is async and connection-oriented:
//! - `connect()` establishes a connection to a signaling URL
//! - `send()` transmits one UTF-8 signaling envelope
//! - `recv()` receives one UTF-8 signaling envelope
//! - `close()` gracefully terminates
//!
//! All methods take `&self` so one task can sit in `recv()` while others send.
//! Implementations serialize concurrent sends internally.
//!
//! # Example
//!
//! ```ignore
//! let transport = WebSocketTransport::new();
//! transport.connect("ws://127.0.0.1:8080/ws?room=home&peer_id=laptop").await?;
//! transport.send(&envelope.to_text()?).await?;
//! let text = transport.recv().await?;
//! ```

mod memory;
mod mock;
mod websocket;

pub use memory::{memory_signaling, MemoryAccepted, MemoryDialer, MemoryListener, MemoryTransport};
pub use mock::MockTransport;
pub use websocket::WebSocketTransport;

use async_trait::async_trait;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Connection timeout.
    #[error("connection timeout")]
    Timeout,
}

/// Transport trait for the signaling channel.
///
/// Implementations handle the underlying connection mechanism
/// (WebSocket, in-memory, mock).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the signaling endpoint at `url`.
    ///
    /// Room and peer id travel in the URL query.
    async fn connect(&self, url: &str) -> Result<(), TransportError>;

    /// Send one textual envelope.
    async fn send(&self, text: &str) -> Result<(), TransportError>;

    /// Receive one textual envelope.
    ///
    /// Blocks until data is available or the connection closes.
    async fn recv(&self) -> Result<String, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection gracefully.
    async fn close(&self) -> Result<(), TransportError>;
}
