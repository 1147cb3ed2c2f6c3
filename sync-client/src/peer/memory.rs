//! In-process peer network for tests.
//!
//! Offers and answers are opaque tokens (`memory-offer:<n>`,
//! `memory-answer:<n>`) that only mean something to the same
//! [`MemoryNetwork`]. Each side trickles one `memory-candidate:<peer>` after
//! its description, so the candidate path is exercised too. The channel opens
//! on both sides when the initiator applies the answer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use sync_types::PeerId;
use tokio::sync::mpsc;

use super::{PeerConnector, PeerError, PeerEvent, PeerEvents, PeerLink};

const OFFER_PREFIX: &str = "memory-offer:";
const ANSWER_PREFIX: &str = "memory-answer:";
const CANDIDATE_PREFIX: &str = "memory-candidate:";

/// In-process peer-to-peer network shared by every coordinator in a test.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

#[derive(Debug, Default)]
struct NetworkInner {
    next_token: u64,
    pending: HashMap<u64, Pending>,
    stall_gathering: bool,
    fail_next_offer: Option<String>,
    links_created: usize,
    candidates_applied: usize,
}

#[derive(Debug)]
struct Pending {
    initiator: mpsc::UnboundedSender<PeerEvent>,
    responder: Option<mpsc::UnboundedSender<PeerEvent>>,
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make candidate gathering never complete (for timeout tests).
    pub fn stall_gathering(&self, stall: bool) {
        self.lock().stall_gathering = stall;
    }

    /// Cause the next `create_offer()` to fail with the given error.
    pub fn fail_next_offer(&self, error: &str) {
        self.lock().fail_next_offer = Some(error.to_string());
    }

    /// Number of links created so far.
    pub fn links_created(&self) -> usize {
        self.lock().links_created
    }

    /// Number of remote candidates applied so far.
    pub fn candidates_applied(&self) -> usize {
        self.lock().candidates_applied
    }

    fn lock(&self) -> MutexGuard<'_, NetworkInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PeerConnector for MemoryNetwork {
    async fn create_link(
        &self,
        local: &PeerId,
        _remote: &PeerId,
    ) -> Result<(Arc<dyn PeerLink>, PeerEvents), PeerError> {
        let (events, rx) = mpsc::unbounded_channel();
        self.lock().links_created += 1;

        let link = MemoryLink {
            network: self.clone(),
            local: local.clone(),
            events,
            state: Mutex::new(LinkState::default()),
        };
        Ok((Arc::new(link), rx))
    }
}

struct MemoryLink {
    network: MemoryNetwork,
    local: PeerId,
    events: mpsc::UnboundedSender<PeerEvent>,
    state: Mutex<LinkState>,
}

#[derive(Default)]
struct LinkState {
    token: Option<u64>,
    remote: Option<mpsc::UnboundedSender<PeerEvent>>,
    closed: bool,
}

impl MemoryLink {
    fn state(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn gather(&self) {
        let stall = self.network.lock().stall_gathering;
        if stall {
            std::future::pending::<()>().await;
        }
        let _ = self
            .events
            .send(PeerEvent::LocalCandidate(format!("{CANDIDATE_PREFIX}{}", self.local)));
    }
}

fn parse_token(description: &str, prefix: &str) -> Result<u64, PeerError> {
    description
        .strip_prefix(prefix)
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| PeerError::Negotiation(format!("malformed description: {description}")))
}

#[async_trait]
impl PeerLink for MemoryLink {
    async fn create_offer(&self) -> Result<String, PeerError> {
        let token = {
            let mut net = self.network.lock();
            if let Some(error) = net.fail_next_offer.take() {
                return Err(PeerError::Negotiation(error));
            }
            net.next_token += 1;
            let token = net.next_token;
            net.pending.insert(
                token,
                Pending {
                    initiator: self.events.clone(),
                    responder: None,
                },
            );
            token
        };
        self.state().token = Some(token);

        self.gather().await;
        Ok(format!("{OFFER_PREFIX}{token}"))
    }

    async fn accept_offer(&self, offer: &str) -> Result<String, PeerError> {
        let token = parse_token(offer, OFFER_PREFIX)?;
        let initiator = {
            let mut net = self.network.lock();
            let pending = net
                .pending
                .get_mut(&token)
                .ok_or_else(|| PeerError::Negotiation(format!("unknown offer {token}")))?;
            pending.responder = Some(self.events.clone());
            pending.initiator.clone()
        };
        {
            let mut state = self.state();
            state.token = Some(token);
            state.remote = Some(initiator);
        }

        self.gather().await;
        Ok(format!("{ANSWER_PREFIX}{token}"))
    }

    async fn apply_answer(&self, answer: &str) -> Result<(), PeerError> {
        let token = parse_token(answer, ANSWER_PREFIX)?;
        if self.state().token != Some(token) {
            return Err(PeerError::Negotiation(format!(
                "answer {token} does not match our offer"
            )));
        }

        let responder = self
            .network
            .lock()
            .pending
            .remove(&token)
            .and_then(|p| p.responder)
            .ok_or_else(|| PeerError::Negotiation("offer was never accepted".into()))?;

        self.state().remote = Some(responder.clone());
        let _ = responder.send(PeerEvent::ChannelOpen);
        let _ = self.events.send(PeerEvent::ChannelOpen);
        Ok(())
    }

    async fn add_candidate(&self, candidate: &str) -> Result<(), PeerError> {
        if !candidate.starts_with(CANDIDATE_PREFIX) {
            return Err(PeerError::InvalidCandidate(candidate.to_string()));
        }
        self.network.lock().candidates_applied += 1;
        Ok(())
    }

    async fn send(&self, frame: &[u8]) -> Result<(), PeerError> {
        let remote = {
            let state = self.state();
            if state.closed {
                return Err(PeerError::ChannelClosed);
            }
            state.remote.clone().ok_or(PeerError::ChannelClosed)?
        };
        remote
            .send(PeerEvent::Message(frame.to_vec()))
            .map_err(|_| PeerError::ChannelClosed)
    }

    async fn close(&self) {
        let (remote, token) = {
            let mut state = self.state();
            if state.closed {
                return;
            }
            state.closed = true;
            (state.remote.take(), state.token)
        };
        if let Some(token) = token {
            self.network.lock().pending.remove(&token);
        }
        if let Some(remote) = remote {
            let _ = remote.send(PeerEvent::Closed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pair(net: &MemoryNetwork) -> ((Arc<dyn PeerLink>, PeerEvents), (Arc<dyn PeerLink>, PeerEvents)) {
        let a = net
            .create_link(&PeerId::new("a"), &PeerId::new("b"))
            .await
            .unwrap();
        let b = net
            .create_link(&PeerId::new("b"), &PeerId::new("a"))
            .await
            .unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn offer_answer_opens_both_sides() {
        let net = MemoryNetwork::new();
        let ((a, mut a_events), (b, mut b_events)) = pair(&net).await;

        let offer = a.create_offer().await.unwrap();
        let answer = b.accept_offer(&offer).await.unwrap();
        a.apply_answer(&answer).await.unwrap();

        assert_eq!(
            a_events.recv().await,
            Some(PeerEvent::LocalCandidate("memory-candidate:a".into()))
        );
        assert_eq!(a_events.recv().await, Some(PeerEvent::ChannelOpen));
        assert_eq!(
            b_events.recv().await,
            Some(PeerEvent::LocalCandidate("memory-candidate:b".into()))
        );
        assert_eq!(b_events.recv().await, Some(PeerEvent::ChannelOpen));

        a.send(b"frame").await.unwrap();
        assert_eq!(
            b_events.recv().await,
            Some(PeerEvent::Message(b"frame".to_vec()))
        );
        b.send(b"back").await.unwrap();
        assert_eq!(
            a_events.recv().await,
            Some(PeerEvent::Message(b"back".to_vec()))
        );
        assert_eq!(net.links_created(), 2);
    }

    #[tokio::test]
    async fn close_notifies_remote() {
        let net = MemoryNetwork::new();
        let ((a, _a_events), (b, mut b_events)) = pair(&net).await;
        let offer = a.create_offer().await.unwrap();
        let answer = b.accept_offer(&offer).await.unwrap();
        a.apply_answer(&answer).await.unwrap();

        a.close().await;
        a.close().await;

        let mut saw_closed = false;
        while let Ok(event) = b_events.try_recv() {
            saw_closed |= event == PeerEvent::Closed;
        }
        assert!(saw_closed);
        assert!(matches!(a.send(b"x").await, Err(PeerError::ChannelClosed)));
    }

    #[tokio::test]
    async fn bad_descriptions_are_negotiation_errors() {
        let net = MemoryNetwork::new();
        let ((a, _), (b, _)) = pair(&net).await;

        assert!(matches!(
            b.accept_offer("v=0 garbage").await,
            Err(PeerError::Negotiation(_))
        ));
        assert!(matches!(
            b.accept_offer("memory-offer:99").await,
            Err(PeerError::Negotiation(_))
        ));

        a.create_offer().await.unwrap();
        assert!(matches!(
            a.apply_answer("memory-answer:1").await,
            Err(PeerError::Negotiation(_))
        ));
    }

    #[tokio::test]
    async fn candidates_are_validated() {
        let net = MemoryNetwork::new();
        let ((a, _), _) = pair(&net).await;

        a.add_candidate("memory-candidate:b").await.unwrap();
        assert!(matches!(
            a.add_candidate("candidate:1 udp").await,
            Err(PeerError::InvalidCandidate(_))
        ));
        assert_eq!(net.candidates_applied(), 1);
    }

    #[tokio::test]
    async fn injected_offer_failure() {
        let net = MemoryNetwork::new();
        net.fail_next_offer("no codecs");
        let ((a, _), _) = pair(&net).await;

        assert!(a.create_offer().await.is_err());
        assert!(a.create_offer().await.is_ok());
    }

    #[tokio::test]
    async fn stalled_gathering_never_completes() {
        let net = MemoryNetwork::new();
        net.stall_gathering(true);
        let ((a, _), _) = pair(&net).await;

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), a.create_offer()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn send_before_negotiation_fails() {
        let net = MemoryNetwork::new();
        let ((a, _), _) = pair(&net).await;
        assert!(matches!(a.send(b"x").await, Err(PeerError::ChannelClosed)));
    }
}
