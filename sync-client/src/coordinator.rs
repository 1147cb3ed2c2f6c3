//! SyncCoordinator - the main interface for clipsync.
//!
//! This module provides [`SyncCoordinator`], which owns the signaling
//! connection, the local clipboard guard, the shared key and the table of
//! peer sessions.
//!
//! # Architecture
//!
//! ```text
//!                    ┌─► receive loop ─► dispatch by envelope type ─► session tasks
//! Signaling ◄────────┤
//!                    └── session tasks send offer/answer/candidate
//!
//! Clipboard watch ─► seal with CryptoBox ─► every open peer link
//! ```
//!
//! # Example
//!
//! ```ignore
//! use clipsync_client::{SyncConfig, SyncCoordinator, WebSocketTransport, TcpConnector};
//!
//! let config = SyncConfig::new("shared password", "ws://relay:8080/ws", Duration::from_secs(10))
//!     .with_room("home");
//! let coordinator = SyncCoordinator::new(config, WebSocketTransport::new(), TcpConnector::default(), clipboard)?;
//! coordinator.run_until(tokio::signal::ctrl_c()).await?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::join_all;
use sync_core::{offer_disposition, Event, OfferDisposition, SessionState};
use sync_types::{EnvelopeType, PeerId, RoomId, SignalingEnvelope, SyncError};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clipboard::{ClipboardBackend, ClipboardError, ClipboardGuard};
use crate::crypto::{CryptoBox, CryptoError};
use crate::peer::{PeerConnector, PeerLink};
use crate::session::{SessionContext, SessionHandle, SessionTable};
use crate::transport::{Transport, TransportError};

/// Default bound on the best-effort Leave at shutdown.
pub const DEFAULT_LEAVE_TIMEOUT: Duration = Duration::from_secs(2);

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Invalid configuration (fatal at startup).
    #[error("configuration error: {0}")]
    Config(String),

    /// Signaling transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Clipboard error.
    #[error("clipboard error: {0}")]
    Clipboard(#[from] ClipboardError),

    /// Envelope encoding error.
    #[error("envelope error: {0}")]
    Envelope(#[from] SyncError),

    /// `start()` was called twice.
    #[error("coordinator already started")]
    AlreadyStarted,
}

/// Configuration for SyncCoordinator.
#[derive(Clone)]
pub struct SyncConfig {
    /// Shared password; every peer in the room must use the same one.
    pub password: String,
    /// Signaling endpoint, e.g. `ws://relay:8080/ws`.
    pub signaling_url: String,
    /// Room to join.
    pub room: RoomId,
    /// This process's peer id.
    pub peer_id: PeerId,
    /// Upper bound on building an offer/answer including candidate gathering.
    pub gather_timeout: Duration,
    /// Upper bound on sending Leave at shutdown.
    pub leave_timeout: Duration,
}

impl SyncConfig {
    /// Create a configuration with the default room and a random peer id.
    pub fn new(password: &str, signaling_url: &str, gather_timeout: Duration) -> Self {
        Self {
            password: password.to_string(),
            signaling_url: signaling_url.to_string(),
            room: RoomId::default(),
            peer_id: PeerId::random(),
            gather_timeout,
            leave_timeout: DEFAULT_LEAVE_TIMEOUT,
        }
    }

    /// Set the room.
    pub fn with_room(mut self, room: &str) -> Self {
        self.room = RoomId::new(room);
        self
    }

    /// Set the peer id.
    pub fn with_peer_id(mut self, peer_id: &str) -> Self {
        self.peer_id = PeerId::new(peer_id);
        self
    }

    /// Set the Leave timeout.
    pub fn with_leave_timeout(mut self, timeout: Duration) -> Self {
        self.leave_timeout = timeout;
        self
    }

    /// Check the configuration before any I/O happens.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.password.is_empty() {
            return Err(ClientError::Config("password is required".into()));
        }
        if self.peer_id.is_empty() {
            return Err(ClientError::Config("peer id must not be empty".into()));
        }
        if self.gather_timeout.is_zero() {
            return Err(ClientError::Config(
                "gather timeout must be greater than zero".into(),
            ));
        }
        self.connect_url().map(|_| ())
    }

    /// Signaling URL with `room` and `peer_id` query parameters attached.
    pub fn connect_url(&self) -> Result<String, ClientError> {
        let mut url = url::Url::parse(&self.signaling_url).map_err(|e| {
            ClientError::Config(format!("invalid signaling url {:?}: {}", self.signaling_url, e))
        })?;
        url.query_pairs_mut()
            .append_pair("room", self.room.as_str())
            .append_pair("peer_id", self.peer_id.as_str());
        Ok(url.to_string())
    }
}

// Don't leak the password in debug output
impl std::fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncConfig")
            .field("password", &"[REDACTED]")
            .field("signaling_url", &self.signaling_url)
            .field("room", &self.room)
            .field("peer_id", &self.peer_id)
            .field("gather_timeout", &self.gather_timeout)
            .field("leave_timeout", &self.leave_timeout)
            .finish()
    }
}

/// Orchestrates signaling, clipboard and peer sessions for one process.
pub struct SyncCoordinator<T, P, C>
where
    T: Transport + 'static,
    P: PeerConnector,
    C: ClipboardBackend,
{
    inner: Arc<Inner<T, P, C>>,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct Inner<T, P, C: ClipboardBackend> {
    config: SyncConfig,
    ctx: Arc<SessionContext<T, P, C>>,
    sessions: SessionTable,
    next_session_id: AtomicU64,
}

impl<T, P, C> SyncCoordinator<T, P, C>
where
    T: Transport + 'static,
    P: PeerConnector,
    C: ClipboardBackend,
{
    /// Create a coordinator. Fails fast on invalid configuration.
    pub fn new(config: SyncConfig, signaling: T, connector: P, clipboard: C) -> Result<Self, ClientError> {
        config.validate()?;
        let crypto = CryptoBox::from_password(&config.password);
        debug!(peer = %config.peer_id, "derived shared key");

        let ctx = Arc::new(SessionContext {
            local: config.peer_id.clone(),
            signaling,
            connector,
            guard: ClipboardGuard::new(clipboard),
            crypto,
            gather_timeout: config.gather_timeout,
            shutdown: CancellationToken::new(),
        });

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                ctx,
                sessions: Arc::new(RwLock::new(HashMap::new())),
                next_session_id: AtomicU64::new(1),
            }),
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Initialize the clipboard, connect to signaling, announce Join and
    /// start the receive and watch loops.
    pub async fn start(&self) -> Result<(), ClientError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyStarted);
        }
        let inner = &self.inner;

        inner.ctx.guard.init().await?;
        info!("clipboard watcher ready");

        let url = inner.config.connect_url()?;
        inner.ctx.signaling.connect(&url).await?;
        info!(
            room = %inner.config.room,
            peer = %inner.config.peer_id,
            "connected to signaling server"
        );

        let join = SignalingEnvelope::join(inner.ctx.local.clone());
        inner.ctx.signaling.send(&join.to_text()?).await?;

        let receive = tokio::spawn(Arc::clone(inner).receive_loop());
        let watch = tokio::spawn(Arc::clone(inner).watch_loop());
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend([receive, watch]);
        Ok(())
    }

    /// Start, run until `shutdown` resolves, then shut down.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), ClientError>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        self.shutdown().await;
        Ok(())
    }

    /// Stop watching, announce Leave (best effort) and close every session.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.ctx.shutdown.cancel();

        let leave = SignalingEnvelope::leave(inner.ctx.local.clone());
        match leave.to_text() {
            Ok(text) => {
                match tokio::time::timeout(
                    inner.config.leave_timeout,
                    inner.ctx.signaling.send(&text),
                )
                .await
                {
                    Ok(Ok(())) => debug!("announced leave"),
                    Ok(Err(e)) => warn!("failed to announce leave: {}", e),
                    Err(_) => warn!("timed out announcing leave"),
                }
            }
            Err(e) => warn!("failed to encode leave: {}", e),
        }

        for handle in inner.sessions.read().await.values() {
            handle.deliver(Event::ShutdownRequested);
        }
        if let Err(e) = inner.ctx.signaling.close().await {
            debug!("signaling close: {}", e);
        }
        info!("sync stopped");
    }

    /// Route one inbound signaling envelope.
    pub async fn handle_envelope(&self, envelope: SignalingEnvelope) {
        self.inner.dispatch(envelope).await;
    }

    /// Seal `content` and send it to every peer with an open data channel.
    ///
    /// Returns how many peers accepted the frame.
    pub async fn broadcast_clipboard(&self, content: &[u8]) -> Result<usize, ClientError> {
        self.inner.broadcast(content).await
    }

    /// This process's peer id.
    pub fn local_peer_id(&self) -> &PeerId {
        &self.inner.config.peer_id
    }

    /// The active configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// The wrapped clipboard backend.
    pub fn clipboard(&self) -> &C {
        self.inner.ctx.guard.backend()
    }

    /// State of the session with `peer`, if one exists.
    pub async fn session_state(&self, peer: &PeerId) -> Option<SessionState> {
        self.inner.sessions.read().await.get(peer).map(|h| h.state())
    }

    /// Peers whose data channel is open, sorted.
    pub async fn connected_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .inner
            .sessions
            .read()
            .await
            .iter()
            .filter(|(_, h)| h.state().is_connected())
            .map(|(peer, _)| peer.clone())
            .collect();
        peers.sort();
        peers
    }

    /// Number of live sessions in any state.
    pub async fn session_count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    /// True while the signaling connection is up.
    pub fn is_signaling_connected(&self) -> bool {
        self.inner.ctx.signaling.is_connected()
    }
}

impl<T, P, C> Drop for SyncCoordinator<T, P, C>
where
    T: Transport + 'static,
    P: PeerConnector,
    C: ClipboardBackend,
{
    fn drop(&mut self) {
        self.inner.ctx.shutdown.cancel();
        for task in self
            .tasks
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
        {
            task.abort();
        }
        // Session tasks exit on the token; dropping their handles also ends them
        if let Ok(mut sessions) = self.inner.sessions.try_write() {
            sessions.clear();
        }
    }
}

impl<T, P, C> Inner<T, P, C>
where
    T: Transport + 'static,
    P: PeerConnector,
    C: ClipboardBackend,
{
    async fn receive_loop(self: Arc<Self>) {
        loop {
            match self.ctx.signaling.recv().await {
                Ok(text) => match SignalingEnvelope::from_text(&text) {
                    Ok(envelope) => self.dispatch(envelope).await,
                    Err(e) => warn!("dropping signaling message: {}", e),
                },
                Err(_) if self.ctx.shutdown.is_cancelled() => break,
                Err(e) => {
                    // Open peer sessions keep running without signaling
                    error!("signaling connection lost: {}", e);
                    break;
                }
            }
        }
        debug!("signaling receive loop stopped");
    }

    async fn watch_loop(self: Arc<Self>) {
        let shutdown = self.ctx.shutdown.clone();
        let mut changes = self.ctx.guard.watch(shutdown.child_token());

        loop {
            let content = tokio::select! {
                _ = shutdown.cancelled() => break,
                change = changes.next() => match change {
                    Some(content) => content,
                    None => break,
                },
            };
            match self.broadcast(&content).await {
                Ok(peers) => info!(bytes = content.len(), peers, "sent clipboard update"),
                Err(e) => warn!("failed to send clipboard update: {}", e),
            }
        }
        debug!("clipboard watch loop stopped");
    }

    async fn dispatch(&self, envelope: SignalingEnvelope) {
        let local = &self.ctx.local;
        if envelope.from == *local {
            debug!("ignoring own envelope");
            return;
        }
        if !envelope.is_addressed_to(local) {
            debug!(from = %envelope.from, kind = %envelope.kind, "ignoring envelope for another peer");
            return;
        }

        let remote = envelope.from;
        debug!(peer = %remote, kind = %envelope.kind, "received signaling envelope");
        match (envelope.kind, envelope.payload) {
            (EnvelopeType::Join, _) => {
                let mut table = self.sessions.write().await;
                self.replace_session(&mut table, remote, Event::PeerJoined);
            }
            (EnvelopeType::Leave, _) => self.deliver(&remote, Event::PeerLeft).await,
            (EnvelopeType::Offer, Some(sdp)) => self.on_offer(remote, sdp).await,
            (EnvelopeType::Answer, Some(sdp)) => {
                self.deliver(&remote, Event::AnswerReceived { sdp }).await
            }
            (EnvelopeType::Candidate, Some(candidate)) => {
                self.deliver(&remote, Event::CandidateReceived { candidate })
                    .await
            }
            (kind, None) => warn!(peer = %remote, %kind, "dropping envelope without payload"),
        }
    }

    async fn on_offer(&self, remote: PeerId, sdp: String) {
        let mut table = self.sessions.write().await;
        let disposition = table
            .get(&remote)
            .map(|h| offer_disposition(&h.state(), &self.ctx.local, &remote));

        match disposition {
            Some(OfferDisposition::Deliver) => {
                if let Some(handle) = table.get(&remote) {
                    handle.deliver(Event::OfferReceived { sdp });
                }
            }
            Some(OfferDisposition::Ignore) => {
                debug!(peer = %remote, "simultaneous offers: keeping ours");
            }
            Some(OfferDisposition::Replace) | None => {
                self.replace_session(&mut table, remote, Event::OfferReceived { sdp });
            }
        }
    }

    /// Close any existing session for `remote` and start a fresh one.
    fn replace_session(
        &self,
        table: &mut HashMap<PeerId, SessionHandle>,
        remote: PeerId,
        first: Event,
    ) {
        if let Some(old) = table.remove(&remote) {
            info!(peer = %remote, "replacing existing session");
            old.deliver(Event::Replaced);
        }
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let handle = SessionHandle::spawn(
            Arc::clone(&self.ctx),
            Arc::clone(&self.sessions),
            remote.clone(),
            id,
            first,
        );
        table.insert(remote, handle);
    }

    /// Feed an event to an existing session; dropped if there is none.
    async fn deliver(&self, remote: &PeerId, event: Event) {
        match self.sessions.read().await.get(remote) {
            Some(handle) => {
                handle.deliver(event);
            }
            None => debug!(peer = %remote, ?event, "no session, dropping"),
        }
    }

    async fn broadcast(&self, content: &[u8]) -> Result<usize, ClientError> {
        let frame = self.ctx.crypto.seal(content)?;
        let links: Vec<(PeerId, Arc<dyn PeerLink>)> = self
            .sessions
            .read()
            .await
            .iter()
            .filter_map(|(peer, h)| h.open_link().map(|link| (peer.clone(), link)))
            .collect();

        let frame = &frame;
        let results = join_all(links.iter().map(|(peer, link)| async move {
            (peer, link.send(frame).await)
        }))
        .await;

        let mut delivered = 0;
        for (peer, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => warn!(%peer, "failed to send clipboard update: {}", e),
            }
        }
        Ok(delivered)
    }
}
