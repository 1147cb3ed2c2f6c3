//! Direct TCP links on a local network.
//!
//! Negotiation maps onto plain sockets:
//! - offer: the initiator binds a listener and advertises `{"addrs":[..]}`
//!   with its first address; further addresses trickle out as candidates
//!   `{"addr":".."}`
//! - answer: `{"accepted":true}`; the responder dials the advertised
//!   addresses in order, then any trickled ones
//! - the responder's first frame echoes the random token from the offer;
//!   the initiator drops connections that do not, and keeps listening
//! - the channel is open once the token has been checked
//!
//! Frames are length-prefixed (4 bytes, big-endian). There is no NAT
//! traversal: both peers must reach each other directly.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sync_types::PeerId;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{PeerConnector, PeerError, PeerEvent, PeerEvents, PeerLink};

/// Maximum data-plane frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Per-address connect timeout.
const DIAL_TIMEOUT: Duration = Duration::from_secs(3);

/// How long the responder waits for trickled candidates once it has run out
/// of addresses to try.
const CANDIDATE_GRACE: Duration = Duration::from_secs(2);

/// How long an accepted connection has to present the offer token.
const HELLO_TIMEOUT: Duration = Duration::from_secs(3);

type LinkToken = [u8; 16];

#[derive(Debug, Serialize, Deserialize)]
struct TcpOffer {
    addrs: Vec<SocketAddr>,
    token: LinkToken,
}

#[derive(Debug, Serialize, Deserialize)]
struct TcpAnswer {
    accepted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct TcpCandidate {
    addr: SocketAddr,
}

/// Non-loopback IPv4 addresses of every interface that is up.
///
/// Returns an empty list (and logs) if interfaces cannot be enumerated.
pub fn local_ipv4_addrs() -> Vec<Ipv4Addr> {
    match local_ip_address::list_afinet_netifas() {
        Ok(interfaces) => {
            let mut addrs: Vec<Ipv4Addr> = interfaces
                .into_iter()
                .filter_map(|(_, ip)| match ip {
                    IpAddr::V4(v4) if !v4.is_loopback() => Some(v4),
                    _ => None,
                })
                .collect();
            addrs.sort();
            addrs.dedup();
            addrs
        }
        Err(e) => {
            warn!("failed to list network interfaces: {}", e);
            Vec::new()
        }
    }
}

/// Creates TCP links.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    listen_ip: IpAddr,
}

impl TcpConnector {
    /// Listen on `listen_ip` when acting as initiator.
    ///
    /// An unspecified address (`0.0.0.0`) advertises every local IPv4
    /// address plus loopback.
    pub fn new(listen_ip: IpAddr) -> Self {
        Self { listen_ip }
    }

    /// Loopback-only connector (tests, single machine).
    pub fn localhost() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    fn advertised(&self, port: u16) -> Vec<SocketAddr> {
        if !self.listen_ip.is_unspecified() {
            return vec![SocketAddr::new(self.listen_ip, port)];
        }
        local_ipv4_addrs()
            .into_iter()
            .map(IpAddr::V4)
            .chain(std::iter::once(IpAddr::V4(Ipv4Addr::LOCALHOST)))
            .map(|ip| SocketAddr::new(ip, port))
            .collect()
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }
}

#[async_trait]
impl PeerConnector for TcpConnector {
    async fn create_link(
        &self,
        _local: &PeerId,
        remote: &PeerId,
    ) -> Result<(Arc<dyn PeerLink>, PeerEvents), PeerError> {
        let (events, rx) = mpsc::unbounded_channel();
        let link = TcpLink {
            connector: self.clone(),
            remote: remote.clone(),
            shared: Arc::new(Shared {
                events,
                writer: tokio::sync::Mutex::new(None),
                candidates: Mutex::new(Vec::new()),
                candidate_added: Notify::new(),
                closed: AtomicBool::new(false),
            }),
            tasks: Mutex::new(Vec::new()),
        };
        Ok((Arc::new(link), rx))
    }
}

struct Shared {
    events: mpsc::UnboundedSender<PeerEvent>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    candidates: Mutex<Vec<SocketAddr>>,
    candidate_added: Notify,
    closed: AtomicBool,
}

impl Shared {
    fn emit(&self, event: PeerEvent) {
        if !self.closed.load(Ordering::SeqCst) {
            let _ = self.events.send(event);
        }
    }

    fn candidate(&self, index: usize) -> Option<SocketAddr> {
        self.candidates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(index)
            .copied()
    }

    fn push_candidates(&self, addrs: impl IntoIterator<Item = SocketAddr>) {
        self.candidates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(addrs);
        self.candidate_added.notify_one();
    }
}

struct TcpLink {
    connector: TcpConnector,
    remote: PeerId,
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TcpLink {
    fn spawn(&self, task: impl std::future::Future<Output = ()> + Send + 'static) {
        let handle = tokio::spawn(task);
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }
}

#[async_trait]
impl PeerLink for TcpLink {
    async fn create_offer(&self) -> Result<String, PeerError> {
        let listener = TcpListener::bind((self.connector.listen_ip, 0)).await?;
        let port = listener.local_addr()?.port();

        let mut addrs = self.connector.advertised(port).into_iter();
        let first = addrs
            .next()
            .ok_or_else(|| PeerError::Negotiation("no usable local address".into()))?;
        let mut token = LinkToken::default();
        getrandom::getrandom(&mut token)
            .map_err(|e| PeerError::Negotiation(format!("no randomness for link token: {e}")))?;
        let offer = serde_json::to_string(&TcpOffer {
            addrs: vec![first],
            token,
        })
        .map_err(|e| PeerError::Negotiation(e.to_string()))?;

        // Everything past the first address trickles after the offer
        for addr in addrs {
            if let Ok(candidate) = serde_json::to_string(&TcpCandidate { addr }) {
                self.shared.emit(PeerEvent::LocalCandidate(candidate));
            }
        }

        let shared = Arc::clone(&self.shared);
        let remote = self.remote.clone();
        self.spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, from)) => match check_hello(stream, &token).await {
                        Ok(stream) => {
                            debug!(peer = %remote, %from, "accepted data connection");
                            run_stream(shared, stream).await;
                            return;
                        }
                        Err(e) => warn!(peer = %remote, %from, "rejected data connection: {}", e),
                    },
                    Err(e) => {
                        shared.emit(PeerEvent::Failed(e.to_string()));
                        return;
                    }
                }
            }
        });

        Ok(offer)
    }

    async fn accept_offer(&self, offer: &str) -> Result<String, PeerError> {
        let offer: TcpOffer = serde_json::from_str(offer)
            .map_err(|e| PeerError::Negotiation(format!("malformed offer: {e}")))?;
        if offer.addrs.is_empty() {
            return Err(PeerError::Negotiation("offer carries no address".into()));
        }
        self.shared.push_candidates(offer.addrs);

        let shared = Arc::clone(&self.shared);
        let remote = self.remote.clone();
        self.spawn(dial(shared, remote, offer.token));

        serde_json::to_string(&TcpAnswer { accepted: true })
            .map_err(|e| PeerError::Negotiation(e.to_string()))
    }

    async fn apply_answer(&self, answer: &str) -> Result<(), PeerError> {
        let answer: TcpAnswer = serde_json::from_str(answer)
            .map_err(|e| PeerError::Negotiation(format!("malformed answer: {e}")))?;
        if !answer.accepted {
            return Err(PeerError::Negotiation("remote declined the offer".into()));
        }
        Ok(())
    }

    async fn add_candidate(&self, candidate: &str) -> Result<(), PeerError> {
        let candidate: TcpCandidate = serde_json::from_str(candidate)
            .map_err(|e| PeerError::InvalidCandidate(e.to_string()))?;
        self.shared.push_candidates([candidate.addr]);
        Ok(())
    }

    async fn send(&self, frame: &[u8]) -> Result<(), PeerError> {
        if frame.len() > MAX_FRAME_SIZE {
            return Err(PeerError::FrameTooLarge(frame.len()));
        }

        let mut guard = self.shared.writer.lock().await;
        let writer = guard.as_mut().ok_or(PeerError::ChannelClosed)?;
        write_frame(writer, frame)
            .await
            .map_err(|e| PeerError::SendFailed(e.to_string()))
    }

    async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
        if let Some(mut writer) = self.shared.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        for task in self
            .tasks
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
        {
            task.abort();
        }
    }
}

/// Responder side: try every known address until one connects.
async fn dial(shared: Arc<Shared>, remote: PeerId, token: LinkToken) {
    let mut next = 0;
    loop {
        match shared.candidate(next) {
            Some(addr) => {
                next += 1;
                match tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(addr)).await {
                    Ok(Ok(mut stream)) => {
                        if let Err(e) = write_frame(&mut stream, &token).await {
                            debug!(peer = %remote, %addr, "hello failed: {}", e);
                            continue;
                        }
                        debug!(peer = %remote, %addr, "data connection established");
                        run_stream(shared, stream).await;
                        return;
                    }
                    Ok(Err(e)) => debug!(peer = %remote, %addr, "dial failed: {}", e),
                    Err(_) => debug!(peer = %remote, %addr, "dial timed out"),
                }
            }
            None => {
                let notified =
                    tokio::time::timeout(CANDIDATE_GRACE, shared.candidate_added.notified())
                        .await
                        .is_ok();
                if !notified && shared.candidate(next).is_none() {
                    shared.emit(PeerEvent::Failed("no advertised address reachable".into()));
                    return;
                }
            }
        }
    }
}

/// Own an established stream: publish the writer, then pump inbound frames.
async fn run_stream(shared: Arc<Shared>, stream: TcpStream) {
    let _ = stream.set_nodelay(true);
    let (mut reader, writer) = stream.into_split();
    *shared.writer.lock().await = Some(writer);
    shared.emit(PeerEvent::ChannelOpen);

    loop {
        match read_frame(&mut reader).await {
            Ok(Some(frame)) => shared.emit(PeerEvent::Message(frame)),
            Ok(None) => {
                shared.emit(PeerEvent::Closed);
                return;
            }
            Err(e) => {
                shared.emit(PeerEvent::Failed(e.to_string()));
                return;
            }
        }
    }
}

/// Initiator side: accept `stream` only if its first frame is `token`.
async fn check_hello(mut stream: TcpStream, token: &LinkToken) -> Result<TcpStream, PeerError> {
    match tokio::time::timeout(HELLO_TIMEOUT, read_frame(&mut stream)).await {
        Ok(Ok(Some(hello))) if hello.as_slice() == token.as_slice() => Ok(stream),
        Ok(Ok(Some(_))) => Err(PeerError::Negotiation("wrong link token".into())),
        Ok(Ok(None)) => Err(PeerError::Negotiation("closed before hello".into())),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(PeerError::Negotiation("no hello in time".into())),
    }
}

/// Write one length-prefixed frame.
async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = frame.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(frame).await
}

/// Read one length-prefixed frame. `Ok(None)` on clean EOF.
async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, PeerError>
where
    R: AsyncRead + Unpin,
{
    // Read 4-byte length prefix (big-endian)
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_FRAME_SIZE {
        return Err(PeerError::FrameTooLarge(len));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next_non_candidate(events: &mut PeerEvents) -> PeerEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("event in time")
                .expect("link alive");
            if !matches!(event, PeerEvent::LocalCandidate(_)) {
                return event;
            }
        }
    }

    async fn connected_pair() -> (
        (Arc<dyn PeerLink>, PeerEvents),
        (Arc<dyn PeerLink>, PeerEvents),
    ) {
        let connector = TcpConnector::localhost();
        let (a, mut a_events) = connector
            .create_link(&PeerId::new("a"), &PeerId::new("b"))
            .await
            .unwrap();
        let (b, mut b_events) = connector
            .create_link(&PeerId::new("b"), &PeerId::new("a"))
            .await
            .unwrap();

        let offer = a.create_offer().await.unwrap();
        let answer = b.accept_offer(&offer).await.unwrap();
        a.apply_answer(&answer).await.unwrap();

        assert_eq!(next_non_candidate(&mut a_events).await, PeerEvent::ChannelOpen);
        assert_eq!(next_non_candidate(&mut b_events).await, PeerEvent::ChannelOpen);
        ((a, a_events), (b, b_events))
    }

    // ===========================================
    // Negotiation Tests
    // ===========================================

    #[test]
    fn loopback_connector_advertises_one_address() {
        let addrs = TcpConnector::localhost().advertised(4000);
        assert_eq!(addrs, vec!["127.0.0.1:4000".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn wildcard_connector_includes_loopback() {
        let addrs = TcpConnector::default().advertised(4000);
        assert!(addrs.contains(&"127.0.0.1:4000".parse().unwrap()));
        assert!(addrs.iter().all(|a| a.port() == 4000));
    }

    #[tokio::test]
    async fn offer_answer_connects_and_carries_frames() {
        let ((a, mut a_events), (b, mut b_events)) = connected_pair().await;

        a.send(b"sealed frame").await.unwrap();
        assert_eq!(
            next_non_candidate(&mut b_events).await,
            PeerEvent::Message(b"sealed frame".to_vec())
        );

        b.send(b"reply").await.unwrap();
        assert_eq!(
            next_non_candidate(&mut a_events).await,
            PeerEvent::Message(b"reply".to_vec())
        );
    }

    #[tokio::test]
    async fn close_is_seen_by_remote() {
        let ((a, _a_events), (b, mut b_events)) = connected_pair().await;

        a.close().await;
        a.close().await;

        assert_eq!(next_non_candidate(&mut b_events).await, PeerEvent::Closed);
        assert!(matches!(a.send(b"x").await, Err(PeerError::ChannelClosed)));
        b.close().await;
    }

    #[tokio::test]
    async fn malformed_descriptions_rejected() {
        let connector = TcpConnector::localhost();
        let (link, _) = connector
            .create_link(&PeerId::new("a"), &PeerId::new("b"))
            .await
            .unwrap();

        assert!(matches!(
            link.accept_offer("v=0").await,
            Err(PeerError::Negotiation(_))
        ));
        assert!(matches!(
            link.accept_offer(r#"{"addrs":[]}"#).await,
            Err(PeerError::Negotiation(_))
        ));
        assert!(matches!(
            link.apply_answer(r#"{"accepted":false}"#).await,
            Err(PeerError::Negotiation(_))
        ));
        assert!(matches!(
            link.add_candidate("candidate:1 udp").await,
            Err(PeerError::InvalidCandidate(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_offer_fails_link() {
        // Reserve a port, then free it so nothing listens there
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = TcpConnector::localhost();
        let (link, mut events) = connector
            .create_link(&PeerId::new("b"), &PeerId::new("a"))
            .await
            .unwrap();
        let offer = serde_json::to_string(&TcpOffer {
            addrs: vec![addr],
            token: [7; 16],
        })
        .unwrap();
        link.accept_offer(&offer).await.unwrap();

        assert!(matches!(
            next_non_candidate(&mut events).await,
            PeerEvent::Failed(_)
        ));
    }

    #[tokio::test]
    async fn stranger_cannot_take_the_link() {
        let connector = TcpConnector::localhost();
        let (a, mut a_events) = connector
            .create_link(&PeerId::new("a"), &PeerId::new("b"))
            .await
            .unwrap();
        let (b, mut b_events) = connector
            .create_link(&PeerId::new("b"), &PeerId::new("a"))
            .await
            .unwrap();
        let offer = a.create_offer().await.unwrap();
        let addr = serde_json::from_str::<TcpOffer>(&offer).unwrap().addrs[0];

        // Another host connects first and sends junk
        let mut stranger = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut stranger, b"let me in").await.unwrap();

        let answer = b.accept_offer(&offer).await.unwrap();
        a.apply_answer(&answer).await.unwrap();
        assert_eq!(next_non_candidate(&mut a_events).await, PeerEvent::ChannelOpen);
        assert_eq!(next_non_candidate(&mut b_events).await, PeerEvent::ChannelOpen);

        a.send(b"for b only").await.unwrap();
        assert_eq!(
            next_non_candidate(&mut b_events).await,
            PeerEvent::Message(b"for b only".to_vec())
        );
    }

    #[tokio::test]
    async fn hello_with_wrong_token_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            write_frame(&mut stream, &[1; 16]).await.unwrap();
            stream
        });
        let (stream, _) = listener.accept().await.unwrap();
        let _client = client.await.unwrap();

        assert!(matches!(
            check_hello(stream, &[2; 16]).await,
            Err(PeerError::Negotiation(_))
        ));
    }

    #[tokio::test]
    async fn oversized_frame_rejected_locally() {
        let ((a, _), _) = connected_pair().await;
        let frame = vec![0u8; MAX_FRAME_SIZE + 1];
        assert!(matches!(
            a.send(&frame).await,
            Err(PeerError::FrameTooLarge(_))
        ));
    }
}
