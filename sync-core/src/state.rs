//! Peer session state machine for clipsync.
//!
//! This module provides a pure, side-effect-free state machine for the lifecycle
//! of one remote peer session. The state machine takes events as input and
//! produces a new state plus a list of actions to execute.
//!
//! The actual I/O (creating peer connections, sending signaling envelopes) is
//! performed by sync-client, not by this module.
//!
//! ```text
//! Idle ──PeerJoined──────► Negotiating{Initiator} ──ChannelOpened──► Connected
//!   └───OfferReceived────► Negotiating{Responder} ──ChannelOpened──►    │
//!                                   │                                   │
//!                    failure / leave / shutdown ─────────────────► Closed (terminal)
//! ```

use sync_types::PeerId;

/// Which side of the offer/answer exchange this session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends the offer (triggered by a Join from the remote).
    Initiator,
    /// Answers an offer.
    Responder,
}

/// Why a session reached `Closed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The remote announced Leave.
    PeerLeft,
    /// The underlying peer connection reported Failed.
    ConnectionFailed {
        /// Error message from the transport.
        error: String,
    },
    /// The underlying peer connection or data channel closed.
    ConnectionClosed,
    /// Building or applying a session description failed.
    NegotiationFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Local shutdown.
    Shutdown,
    /// A fresh session for the same remote took over.
    Replaced,
}

/// Peer session state - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Created, nothing negotiated yet.
    Idle,
    /// Offer/answer exchange in progress.
    Negotiating {
        /// Negotiation role.
        role: Role,
    },
    /// Data channel open; eligible to carry encrypted payloads.
    Connected {
        /// Negotiation role this session was established with.
        role: Role,
    },
    /// Terminal state.
    Closed {
        /// Why the session closed.
        reason: CloseReason,
    },
}

impl SessionState {
    /// Create a new state machine in the Idle state.
    pub fn new() -> Self {
        Self::Idle
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (sync-client)
    /// is responsible for executing the returned actions.
    pub fn on_event(self, event: Event) -> (Self, Vec<Action>) {
        match (self, event) {
            // Terminal: closing twice is a no-op
            (state @ Self::Closed { .. }, _) => (state, vec![]),

            // From Idle
            (Self::Idle, Event::PeerJoined) => (
                Self::Negotiating {
                    role: Role::Initiator,
                },
                vec![Action::StartOffer],
            ),
            (Self::Idle, Event::OfferReceived { sdp }) => (
                Self::Negotiating {
                    role: Role::Responder,
                },
                vec![Action::AcceptOffer { sdp }],
            ),

            // From Negotiating
            (
                state @ Self::Negotiating {
                    role: Role::Initiator,
                },
                Event::LocalDescriptionReady { sdp },
            ) => (state, vec![Action::SendOffer { sdp }]),
            (
                state @ Self::Negotiating {
                    role: Role::Responder,
                },
                Event::LocalDescriptionReady { sdp },
            ) => (state, vec![Action::SendAnswer { sdp }]),
            (
                state @ Self::Negotiating {
                    role: Role::Initiator,
                },
                Event::AnswerReceived { sdp },
            ) => (state, vec![Action::ApplyAnswer { sdp }]),
            (Self::Negotiating { role }, Event::ChannelOpened) => (
                Self::Connected { role },
                vec![Action::EmitEvent(SessionEvent::Connected { role })],
            ),

            // Candidates flow both ways once a connection object exists
            (
                state @ (Self::Negotiating { .. } | Self::Connected { .. }),
                Event::CandidateReceived { candidate },
            ) => (state, vec![Action::AddCandidate { candidate }]),
            (
                state @ (Self::Negotiating { .. } | Self::Connected { .. }),
                Event::LocalCandidate { candidate },
            ) => (state, vec![Action::SendCandidate { candidate }]),

            // Any live state can close
            (_, event) if event.close_reason().is_some() => {
                let reason = event.close_reason().unwrap_or(CloseReason::Shutdown);
                (
                    Self::Closed {
                        reason: reason.clone(),
                    },
                    vec![
                        Action::Teardown,
                        Action::EmitEvent(SessionEvent::Closed { reason }),
                    ],
                )
            }

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if the data channel is open.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Check if negotiation is in progress.
    pub fn is_negotiating(&self) -> bool {
        matches!(self, Self::Negotiating { .. })
    }

    /// Check if the session reached its terminal state.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }

    /// The negotiation role, once one has been chosen.
    pub fn role(&self) -> Option<Role> {
        match self {
            Self::Negotiating { role } | Self::Connected { role } => Some(*role),
            _ => None,
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Events that can occur in a peer session's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A Join envelope arrived from the remote.
    PeerJoined,
    /// An Offer envelope arrived from the remote.
    OfferReceived {
        /// Remote session description.
        sdp: String,
    },
    /// An Answer envelope arrived from the remote.
    AnswerReceived {
        /// Remote session description.
        sdp: String,
    },
    /// A Candidate envelope arrived from the remote.
    CandidateReceived {
        /// Serialized candidate.
        candidate: String,
    },
    /// Local offer/answer is built and candidate gathering completed.
    LocalDescriptionReady {
        /// Local session description.
        sdp: String,
    },
    /// The transport produced a local candidate after gathering.
    LocalCandidate {
        /// Serialized candidate.
        candidate: String,
    },
    /// The data channel reported open.
    ChannelOpened,
    /// The peer connection reported Failed.
    LinkFailed {
        /// Error message from the transport.
        error: String,
    },
    /// The peer connection or data channel closed.
    LinkClosed,
    /// Building or applying a session description failed.
    NegotiationFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// A Leave envelope arrived from the remote.
    PeerLeft,
    /// Local shutdown.
    ShutdownRequested,
    /// A fresh session for the same remote replaced this one.
    Replaced,
}

impl Event {
    /// The close reason this event implies, if it ends the session.
    fn close_reason(&self) -> Option<CloseReason> {
        match self {
            Event::LinkFailed { error } => Some(CloseReason::ConnectionFailed {
                error: error.clone(),
            }),
            Event::LinkClosed => Some(CloseReason::ConnectionClosed),
            Event::NegotiationFailed { error } => Some(CloseReason::NegotiationFailed {
                error: error.clone(),
            }),
            Event::PeerLeft => Some(CloseReason::PeerLeft),
            Event::ShutdownRequested => Some(CloseReason::Shutdown),
            Event::Replaced => Some(CloseReason::Replaced),
            _ => None,
        }
    }
}

/// Actions to be executed by the sync-client.
///
/// These are instructions, not side effects. The sync-client interprets
/// these and performs the actual I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Create the peer connection, open a data channel, build an offer and
    /// wait for candidate gathering.
    StartOffer,
    /// Create the peer connection, adopt the remote's data channel, apply the
    /// remote offer, build an answer and wait for candidate gathering.
    AcceptOffer {
        /// Remote session description.
        sdp: String,
    },
    /// Apply the remote answer.
    ApplyAnswer {
        /// Remote session description.
        sdp: String,
    },
    /// Apply a remote candidate.
    AddCandidate {
        /// Serialized candidate.
        candidate: String,
    },
    /// Send an Offer envelope to the remote.
    SendOffer {
        /// Local session description.
        sdp: String,
    },
    /// Send an Answer envelope to the remote.
    SendAnswer {
        /// Local session description.
        sdp: String,
    },
    /// Send a Candidate envelope to the remote.
    SendCandidate {
        /// Serialized candidate.
        candidate: String,
    },
    /// Release the data channel and peer connection.
    Teardown,
    /// Emit an event to the coordinator.
    EmitEvent(SessionEvent),
}

/// Events emitted to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Data channel open.
    Connected {
        /// Negotiation role.
        role: Role,
    },
    /// Session closed.
    Closed {
        /// Why the session closed.
        reason: CloseReason,
    },
}

/// What to do with an Offer from a remote that already has a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferDisposition {
    /// Feed the offer into the existing session.
    Deliver,
    /// Close the existing session and answer with a fresh responder.
    Replace,
    /// Drop the offer; the remote will yield to ours.
    Ignore,
}

/// Decide how an Offer interacts with an existing session for that remote.
///
/// Simultaneous offers (glare) are resolved by peer id: the lexicographically
/// smaller id yields and becomes the responder. Any other live session means
/// the remote restarted its side, so the offer replaces it.
pub fn offer_disposition(state: &SessionState, local: &PeerId, remote: &PeerId) -> OfferDisposition {
    match state {
        SessionState::Idle => OfferDisposition::Deliver,
        SessionState::Negotiating {
            role: Role::Initiator,
        } => {
            if local < remote {
                OfferDisposition::Replace
            } else {
                OfferDisposition::Ignore
            }
        }
        _ => OfferDisposition::Replace,
    }
}
