//! Peer-to-peer data path abstraction.
//!
//! A [`PeerConnector`] creates one [`PeerLink`] per remote peer. The link
//! carries the negotiation steps the session state machine asks for and,
//! once its channel is open, the encrypted clipboard frames. Everything the
//! underlying transport reports asynchronously (channel open, inbound frames,
//! trickled local candidates, failure) arrives on the link's [`PeerEvents`]
//! queue instead of through callbacks.
//!
//! Implementations:
//! - [`MemoryNetwork`] - in-process links for tests
//! - [`TcpConnector`] - direct TCP on a local network (no NAT traversal)

mod memory;
mod tcp;

pub use memory::MemoryNetwork;
pub use tcp::{local_ipv4_addrs, TcpConnector, MAX_FRAME_SIZE};

use std::sync::Arc;

use async_trait::async_trait;
use sync_types::PeerId;
use thiserror::Error;
use tokio::sync::mpsc;

/// Peer link errors.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Building or applying a session description failed.
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// Local candidate gathering did not finish in time.
    #[error("candidate gathering timed out after {0:?}")]
    GatheringTimeout(std::time::Duration),

    /// A remote candidate could not be applied.
    #[error("invalid candidate: {0}")]
    InvalidCandidate(String),

    /// The data channel is not open.
    #[error("data channel not open")]
    ChannelClosed,

    /// A frame exceeds the data-plane size limit.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Sending on the data channel failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// I/O error from the underlying socket.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Something the underlying transport reported for one link.
#[derive(Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// The data channel is open.
    ChannelOpen,
    /// A frame arrived on the data channel.
    Message(Vec<u8>),
    /// A local candidate became available after the description was sent.
    LocalCandidate(String),
    /// The link closed (remote hung up or the channel was released).
    Closed,
    /// The link failed.
    Failed(String),
}

impl std::fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChannelOpen => write!(f, "ChannelOpen"),
            Self::Message(frame) => write!(f, "Message([{} bytes])", frame.len()),
            Self::LocalCandidate(c) => write!(f, "LocalCandidate({c})"),
            Self::Closed => write!(f, "Closed"),
            Self::Failed(e) => write!(f, "Failed({e})"),
        }
    }
}

/// Event queue of one link. Ends when the link is gone.
pub type PeerEvents = mpsc::UnboundedReceiver<PeerEvent>;

/// One peer connection object.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Initiator: open a data channel, build an offer and wait for local
    /// candidate gathering. Returns the serialized offer.
    async fn create_offer(&self) -> Result<String, PeerError>;

    /// Responder: adopt the remote's data channel, apply its offer, build an
    /// answer and wait for local candidate gathering. Returns the serialized
    /// answer.
    async fn accept_offer(&self, offer: &str) -> Result<String, PeerError>;

    /// Initiator: apply the remote answer.
    async fn apply_answer(&self, answer: &str) -> Result<(), PeerError>;

    /// Apply a remote candidate.
    async fn add_candidate(&self, candidate: &str) -> Result<(), PeerError>;

    /// Send one frame on the open data channel.
    async fn send(&self, frame: &[u8]) -> Result<(), PeerError>;

    /// Release the data channel and the connection. Idempotent.
    async fn close(&self);
}

/// Factory for peer links.
#[async_trait]
pub trait PeerConnector: Send + Sync + 'static {
    /// Create the connection object for a session with `remote`.
    async fn create_link(
        &self,
        local: &PeerId,
        remote: &PeerId,
    ) -> Result<(Arc<dyn PeerLink>, PeerEvents), PeerError>;
}
