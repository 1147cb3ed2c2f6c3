//! Per-peer session driver.
//!
//! Each remote peer gets one task that owns its [`SessionState`] and peer
//! link. The task interprets the actions produced by the pure state machine
//! in sync-core and feeds the outcome back in as events.
//!
//! ```text
//! coordinator ──Event (signaling order)──┐
//!                                        ├─► SessionDriver ─► PeerLink / signaling / clipboard
//! PeerLink ─────PeerEvent────────────────┘
//! ```
//!
//! Negotiation steps (offer/answer building, candidate gathering) are awaited
//! inside the task, bounded by the configured gather timeout, so they never
//! stall the signaling receive loop.

use std::collections::{HashMap, VecDeque};
use std::mem;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sync_core::{Action, CloseReason, Event, SessionEvent, SessionState};
use sync_types::{PeerId, SignalingEnvelope};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clipboard::{ClipboardBackend, ClipboardGuard};
use crate::crypto::CryptoBox;
use crate::peer::{PeerConnector, PeerError, PeerEvent, PeerEvents, PeerLink};
use crate::transport::Transport;

/// Everything a session task needs from its coordinator.
pub(crate) struct SessionContext<T, P, C: ClipboardBackend> {
    pub local: PeerId,
    pub signaling: T,
    pub connector: P,
    pub guard: ClipboardGuard<C>,
    pub crypto: CryptoBox,
    pub gather_timeout: Duration,
    pub shutdown: CancellationToken,
}

pub(crate) type SessionTable = Arc<RwLock<HashMap<PeerId, SessionHandle>>>;

/// State visible outside the session task.
#[derive(Default)]
struct SessionShared {
    state: Mutex<SessionState>,
    link: Mutex<Option<Arc<dyn PeerLink>>>,
}

/// The coordinator's handle on one session task.
pub(crate) struct SessionHandle {
    id: u64,
    commands: mpsc::UnboundedSender<Event>,
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    /// Start a session for `remote`, triggered by `first`.
    ///
    /// The first transition is applied before returning so the table never
    /// shows a session that has not picked its role yet.
    pub fn spawn<T, P, C>(
        ctx: Arc<SessionContext<T, P, C>>,
        table: SessionTable,
        remote: PeerId,
        id: u64,
        first: Event,
    ) -> Self
    where
        T: Transport + 'static,
        P: PeerConnector,
        C: ClipboardBackend,
    {
        let (state, actions) = SessionState::new().on_event(first);
        let shared = Arc::new(SessionShared {
            state: Mutex::new(state.clone()),
            link: Mutex::new(None),
        });
        let (commands, rx) = mpsc::unbounded_channel();

        info!(peer = %remote, ?state, "session started");
        let driver = SessionDriver {
            ctx,
            table,
            remote,
            id,
            shared: Arc::clone(&shared),
            state,
            link: None,
            link_events: None,
            commands: rx,
        };
        tokio::spawn(driver.run(actions));

        Self {
            id,
            commands,
            shared,
        }
    }

    /// Queue an event for the session. False if the task is gone.
    pub fn deliver(&self, event: Event) -> bool {
        self.commands.send(event).is_ok()
    }

    /// Current state snapshot.
    pub fn state(&self) -> SessionState {
        lock(&self.shared.state).clone()
    }

    /// The link, if the data channel is open.
    pub fn open_link(&self) -> Option<Arc<dyn PeerLink>> {
        if !lock(&self.shared.state).is_connected() {
            return None;
        }
        lock(&self.shared.link).clone()
    }
}

enum Input {
    Event(Event),
    Frame(Vec<u8>),
}

struct SessionDriver<T, P, C: ClipboardBackend> {
    ctx: Arc<SessionContext<T, P, C>>,
    table: SessionTable,
    remote: PeerId,
    id: u64,
    shared: Arc<SessionShared>,
    state: SessionState,
    link: Option<Arc<dyn PeerLink>>,
    link_events: Option<PeerEvents>,
    commands: mpsc::UnboundedReceiver<Event>,
}

impl<T, P, C> SessionDriver<T, P, C>
where
    T: Transport + 'static,
    P: PeerConnector,
    C: ClipboardBackend,
{
    async fn run(mut self, first_actions: Vec<Action>) {
        let mut follow_ups = VecDeque::new();
        for action in first_actions {
            if let Some(event) = self.execute(action).await {
                follow_ups.push_back(event);
            }
        }
        self.process(follow_ups).await;

        while !self.state.is_closed() {
            let input = tokio::select! {
                _ = self.ctx.shutdown.cancelled() => Input::Event(Event::ShutdownRequested),
                command = self.commands.recv() => {
                    // Coordinator dropped the handle
                    Input::Event(command.unwrap_or(Event::ShutdownRequested))
                }
                event = next_link_event(&mut self.link_events) => match event {
                    Some(PeerEvent::Message(frame)) => Input::Frame(frame),
                    Some(event) => Input::Event(link_event(event)),
                    None => {
                        self.link_events = None;
                        Input::Event(Event::LinkClosed)
                    }
                },
            };

            match input {
                Input::Event(event) => self.process(VecDeque::from([event])).await,
                Input::Frame(frame) => self.on_frame(frame).await,
            }
        }

        let mut table = self.table.write().await;
        if table.get(&self.remote).map(|h| h.id) == Some(self.id) {
            table.remove(&self.remote);
        }
        debug!(peer = %self.remote, "session removed");
    }

    /// Run events through the state machine, including follow-ups produced
    /// by executing its actions.
    async fn process(&mut self, mut queue: VecDeque<Event>) {
        while let Some(event) = queue.pop_front() {
            let (next, actions) = mem::take(&mut self.state).on_event(event);
            self.set_state(next);
            for action in actions {
                if let Some(event) = self.execute(action).await {
                    queue.push_back(event);
                }
            }
        }
    }

    fn set_state(&mut self, next: SessionState) {
        if mem::discriminant(&self.state) != mem::discriminant(&next) {
            debug!(peer = %self.remote, from = ?self.state, to = ?next, "session transition");
        }
        *lock(&self.shared.state) = next.clone();
        self.state = next;
    }

    async fn execute(&mut self, action: Action) -> Option<Event> {
        match action {
            Action::StartOffer => {
                let link = match self.open_link().await {
                    Ok(link) => link,
                    Err(e) => return Some(negotiation_failed(e)),
                };
                self.bounded(async move { link.create_offer().await }).await
            }
            Action::AcceptOffer { sdp } => {
                let link = match self.open_link().await {
                    Ok(link) => link,
                    Err(e) => return Some(negotiation_failed(e)),
                };
                self.bounded(async move { link.accept_offer(&sdp).await })
                    .await
            }
            Action::ApplyAnswer { sdp } => {
                let link = self.link.clone()?;
                link.apply_answer(&sdp).await.err().map(negotiation_failed)
            }
            Action::AddCandidate { candidate } => {
                if let Some(link) = &self.link {
                    if let Err(e) = link.add_candidate(&candidate).await {
                        warn!(peer = %self.remote, "ignoring remote candidate: {}", e);
                    }
                }
                None
            }
            Action::SendOffer { sdp } => {
                let envelope =
                    SignalingEnvelope::offer(self.ctx.local.clone(), self.remote.clone(), sdp);
                self.signal(envelope).await;
                None
            }
            Action::SendAnswer { sdp } => {
                let envelope =
                    SignalingEnvelope::answer(self.ctx.local.clone(), self.remote.clone(), sdp);
                self.signal(envelope).await;
                None
            }
            Action::SendCandidate { candidate } => {
                let envelope = SignalingEnvelope::candidate(
                    self.ctx.local.clone(),
                    self.remote.clone(),
                    candidate,
                );
                self.signal(envelope).await;
                None
            }
            Action::Teardown => {
                self.link_events = None;
                lock(&self.shared.link).take();
                if let Some(link) = self.link.take() {
                    link.close().await;
                }
                None
            }
            Action::EmitEvent(event) => {
                self.report(event);
                None
            }
        }
    }

    async fn open_link(&mut self) -> Result<Arc<dyn PeerLink>, PeerError> {
        let (link, events) = self
            .ctx
            .connector
            .create_link(&self.ctx.local, &self.remote)
            .await?;
        *lock(&self.shared.link) = Some(Arc::clone(&link));
        self.link = Some(Arc::clone(&link));
        self.link_events = Some(events);
        Ok(link)
    }

    /// Await a description-producing step, bounded by the gather timeout and
    /// cut short by shutdown.
    async fn bounded<F>(&self, step: F) -> Option<Event>
    where
        F: std::future::Future<Output = Result<String, PeerError>>,
    {
        let timeout = self.ctx.gather_timeout;
        tokio::select! {
            result = tokio::time::timeout(timeout, step) => Some(match result {
                Ok(Ok(sdp)) => Event::LocalDescriptionReady { sdp },
                Ok(Err(e)) => negotiation_failed(e),
                Err(_) => negotiation_failed(PeerError::GatheringTimeout(timeout)),
            }),
            _ = self.ctx.shutdown.cancelled() => Some(Event::ShutdownRequested),
        }
    }

    async fn signal(&self, envelope: SignalingEnvelope) {
        let kind = envelope.kind;
        let text = match envelope.to_text() {
            Ok(text) => text,
            Err(e) => {
                warn!(peer = %self.remote, %kind, "failed to encode envelope: {}", e);
                return;
            }
        };
        match self.ctx.signaling.send(&text).await {
            Ok(()) => debug!(peer = %self.remote, %kind, "sent signaling envelope"),
            Err(e) => warn!(peer = %self.remote, %kind, "failed to send envelope: {}", e),
        }
    }

    async fn on_frame(&self, frame: Vec<u8>) {
        if !self.state.is_connected() {
            debug!(peer = %self.remote, "dropping frame on unopened session");
            return;
        }
        match self.ctx.crypto.open(&frame) {
            Ok(content) => match self.ctx.guard.write_safely(&content).await {
                Ok(()) => info!(peer = %self.remote, bytes = content.len(), "applied remote clipboard"),
                Err(e) => warn!(peer = %self.remote, "failed to write clipboard: {}", e),
            },
            // One bad frame never kills the link
            Err(e) => warn!(
                peer = %self.remote,
                "dropping frame: {} (do both peers use the same password?)",
                e
            ),
        }
    }

    fn report(&self, event: SessionEvent) {
        match event {
            SessionEvent::Connected { role } => {
                info!(peer = %self.remote, ?role, "peer connected")
            }
            SessionEvent::Closed { reason } => match reason {
                CloseReason::ConnectionFailed { error } => {
                    warn!(peer = %self.remote, "peer connection failed: {}", error)
                }
                CloseReason::NegotiationFailed { error } => {
                    warn!(peer = %self.remote, "negotiation failed: {}", error)
                }
                reason => info!(peer = %self.remote, ?reason, "peer session closed"),
            },
        }
    }
}

async fn next_link_event(events: &mut Option<PeerEvents>) -> Option<PeerEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn link_event(event: PeerEvent) -> Event {
    match event {
        PeerEvent::ChannelOpen => Event::ChannelOpened,
        PeerEvent::LocalCandidate(candidate) => Event::LocalCandidate { candidate },
        PeerEvent::Closed => Event::LinkClosed,
        PeerEvent::Failed(error) => Event::LinkFailed { error },
        // Frames are routed before reaching the state machine
        PeerEvent::Message(_) => Event::LinkFailed {
            error: "unexpected frame".into(),
        },
    }
}

fn negotiation_failed(error: PeerError) -> Event {
    Event::NegotiationFailed {
        error: error.to_string(),
    }
}

fn lock<V>(mutex: &Mutex<V>) -> std::sync::MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
