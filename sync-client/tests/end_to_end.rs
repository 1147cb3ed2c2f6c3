//! End-to-end tests: two or more coordinators negotiating through a real
//! RoomHub over in-memory signaling, then syncing over the in-memory peer
//! network.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream;
use clipsync_client::{
    memory_signaling, MemoryAccepted, MemoryDialer, MemoryListener, MemoryNetwork,
    MemoryTransport, MockClipboard, PeerId, RoomId, SessionState, SyncConfig, SyncCoordinator,
};
use sync_relay::{ConnectionHandle, Frame, RoomHub};

type Coordinator = SyncCoordinator<MemoryTransport, MemoryNetwork, MockClipboard>;

/// Serve every in-memory signaling connection with `hub`.
fn spawn_relay(hub: Arc<RoomHub>, mut listener: MemoryListener) {
    tokio::spawn(async move {
        while let Some(conn) = listener.accept().await {
            tokio::spawn(serve_connection(Arc::clone(&hub), conn));
        }
    });
}

async fn serve_connection(hub: Arc<RoomHub>, conn: MemoryAccepted) {
    let room = RoomId::new(conn.query("room").unwrap_or_default());
    let peer = PeerId::new(conn.query("peer_id").unwrap_or_default());
    let MemoryAccepted {
        mut inbound,
        outbound,
        ..
    } = conn;

    let (handle, mut outbox) = ConnectionHandle::new();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = outbox.closed.cancelled() => break,
                frame = outbox.frames.recv() => match frame {
                    Some(Frame::Text(text)) => {
                        if outbound.send(text).is_err() {
                            break;
                        }
                    }
                    Some(Frame::Binary(_)) => {}
                    None => break,
                },
            }
        }
    });

    let frames = stream::poll_fn(move |cx| inbound.poll_recv(cx).map(|m| m.map(Frame::Text)));
    let _ = hub.handle_connection(room, peer, handle, frames).await;
}

struct Harness {
    hub: Arc<RoomHub>,
    dialer: MemoryDialer,
    network: MemoryNetwork,
}

impl Harness {
    fn new() -> Self {
        let (dialer, listener) = memory_signaling();
        let hub = Arc::new(RoomHub::new());
        spawn_relay(Arc::clone(&hub), listener);
        Self {
            hub,
            dialer,
            network: MemoryNetwork::new(),
        }
    }

    fn coordinator(&self, peer: &str, password: &str) -> Coordinator {
        let config = SyncConfig::new(password, "memory://relay/ws", Duration::from_secs(2))
            .with_room("test-room")
            .with_peer_id(peer)
            .with_leave_timeout(Duration::from_millis(200));
        SyncCoordinator::new(
            config,
            self.dialer.transport(),
            self.network.clone(),
            MockClipboard::new(),
        )
        .unwrap()
    }

    /// Start `coordinator` and wait until the hub has registered it.
    async fn start(&self, coordinator: &Coordinator) {
        let before = self.hub.peer_count().await;
        coordinator.start().await.unwrap();
        let hub = Arc::clone(&self.hub);
        eventually(|| {
            let hub = Arc::clone(&hub);
            async move { hub.peer_count().await > before }
        })
        .await;
    }
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..300 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

async fn connected(a: &Coordinator, b: &Coordinator) {
    eventually(|| async {
        a.connected_peers().await == vec![b.local_peer_id().clone()]
            && b.connected_peers().await == vec![a.local_peer_id().clone()]
    })
    .await;
}

// ===========================================
// Negotiation Tests
// ===========================================

#[tokio::test]
async fn two_peers_reach_connected() {
    let harness = Harness::new();
    let alice = harness.coordinator("alice", "hunter2");
    let bob = harness.coordinator("bob", "hunter2");

    harness.start(&alice).await;
    harness.start(&bob).await;
    connected(&alice, &bob).await;

    assert_eq!(
        harness.hub.room_members(&RoomId::new("test-room")).await,
        vec![PeerId::new("alice"), PeerId::new("bob")]
    );
    // Alice saw Bob's Join, so she initiated
    assert!(matches!(
        alice.session_state(&PeerId::new("bob")).await,
        Some(SessionState::Connected { role: clipsync_client::Role::Initiator })
    ));
    assert!(matches!(
        bob.session_state(&PeerId::new("alice")).await,
        Some(SessionState::Connected { role: clipsync_client::Role::Responder })
    ));
    // Both sides trickled a candidate
    eventually(|| async { harness.network.candidates_applied() >= 2 }).await;
}

#[tokio::test]
async fn three_peers_form_a_mesh() {
    let harness = Harness::new();
    let a = harness.coordinator("a", "pw");
    let b = harness.coordinator("b", "pw");
    let c = harness.coordinator("c", "pw");

    harness.start(&a).await;
    harness.start(&b).await;
    harness.start(&c).await;

    eventually(|| async {
        a.connected_peers().await.len() == 2
            && b.connected_peers().await.len() == 2
            && c.connected_peers().await.len() == 2
    })
    .await;

    c.clipboard().simulate_copy(b"to everyone");
    eventually(|| async {
        a.clipboard().content() == b"to everyone" && b.clipboard().content() == b"to everyone"
    })
    .await;
}

// ===========================================
// Clipboard Sync Tests
// ===========================================

#[tokio::test]
async fn copy_reaches_peer_without_echo() {
    let harness = Harness::new();
    let alice = harness.coordinator("alice", "hunter2");
    let bob = harness.coordinator("bob", "hunter2");
    harness.start(&alice).await;
    harness.start(&bob).await;
    connected(&alice, &bob).await;

    alice.clipboard().simulate_copy(b"hello from alice");

    eventually(|| async { bob.clipboard().writes() == vec![b"hello from alice".to_vec()] }).await;

    // Bob's OS echoes the write; the guard must not send it back
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(alice.clipboard().writes().is_empty());
    assert_eq!(bob.clipboard().writes().len(), 1);
}

#[tokio::test]
async fn sync_works_in_both_directions() {
    let harness = Harness::new();
    let alice = harness.coordinator("alice", "pw");
    let bob = harness.coordinator("bob", "pw");
    harness.start(&alice).await;
    harness.start(&bob).await;
    connected(&alice, &bob).await;

    alice.clipboard().simulate_copy(b"one");
    eventually(|| async { bob.clipboard().content() == b"one" }).await;

    bob.clipboard().simulate_copy(b"two");
    eventually(|| async { alice.clipboard().content() == b"two" }).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(alice.clipboard().writes(), vec![b"two".to_vec()]);
    assert_eq!(bob.clipboard().writes(), vec![b"one".to_vec()]);
}

#[tokio::test]
async fn wrong_password_drops_frames_but_keeps_session() {
    let harness = Harness::new();
    let alice = harness.coordinator("alice", "correct horse");
    let mallory = harness.coordinator("mallory", "battery staple");
    harness.start(&alice).await;
    harness.start(&mallory).await;
    connected(&alice, &mallory).await;

    alice.clipboard().simulate_copy(b"secret");
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(mallory.clipboard().writes().is_empty());
    assert_eq!(
        mallory.connected_peers().await,
        vec![PeerId::new("alice")]
    );
}

// ===========================================
// Lifecycle Tests
// ===========================================

#[tokio::test]
async fn shutdown_removes_session_on_the_other_side() {
    let harness = Harness::new();
    let alice = harness.coordinator("alice", "pw");
    let bob = harness.coordinator("bob", "pw");
    harness.start(&alice).await;
    harness.start(&bob).await;
    connected(&alice, &bob).await;

    bob.shutdown().await;

    eventually(|| async { alice.session_count().await == 0 }).await;
    eventually(|| async {
        harness.hub.room_members(&RoomId::new("test-room")).await == vec![PeerId::new("alice")]
    })
    .await;
}

#[tokio::test]
async fn dropped_coordinator_stops_syncing() {
    let harness = Harness::new();
    let alice = harness.coordinator("alice", "pw");
    let bob = harness.coordinator("bob", "pw");
    let bob_clipboard = bob.clipboard().clone();
    harness.start(&alice).await;
    harness.start(&bob).await;
    connected(&alice, &bob).await;

    drop(bob);

    eventually(|| async { alice.connected_peers().await.is_empty() }).await;
    alice.clipboard().simulate_copy(b"after bob was dropped");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(bob_clipboard.writes().is_empty());
}

#[tokio::test]
async fn restarted_peer_reconnects() {
    let harness = Harness::new();
    let alice = harness.coordinator("alice", "pw");
    harness.start(&alice).await;

    let bob = harness.coordinator("bob", "pw");
    harness.start(&bob).await;
    connected(&alice, &bob).await;
    drop(bob);

    // Same peer id, fresh process
    let links = harness.network.links_created();
    let bob = harness.coordinator("bob", "pw");
    bob.start().await.unwrap();

    // Alice replaces her old session and both sides build new links
    eventually(|| async { harness.network.links_created() >= links + 2 }).await;
    connected(&alice, &bob).await;

    alice.clipboard().simulate_copy(b"after restart");
    eventually(|| async { bob.clipboard().content() == b"after restart" }).await;
}

#[tokio::test]
async fn stalled_gathering_abandons_session() {
    let harness = Harness::new();
    harness.network.stall_gathering(true);
    let config = |peer: &str| {
        SyncConfig::new("pw", "memory://relay/ws", Duration::from_millis(100))
            .with_room("test-room")
            .with_peer_id(peer)
    };
    let alice = SyncCoordinator::new(
        config("alice"),
        harness.dialer.transport(),
        harness.network.clone(),
        MockClipboard::new(),
    )
    .unwrap();
    let bob = SyncCoordinator::new(
        config("bob"),
        harness.dialer.transport(),
        harness.network.clone(),
        MockClipboard::new(),
    )
    .unwrap();

    harness.start(&alice).await;
    harness.start(&bob).await;

    eventually(|| async { harness.network.links_created() >= 1 }).await;
    eventually(|| async { alice.session_count().await == 0 }).await;
    assert!(alice.connected_peers().await.is_empty());
    assert!(bob.connected_peers().await.is_empty());
}
