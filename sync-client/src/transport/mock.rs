//! Mock signaling transport for testing.
//!
//! Allows queueing inbound envelopes and capturing sent envelopes for verification.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use sync_types::SignalingEnvelope;

/// Mock signaling transport for testing.
///
/// `recv()` pops queued messages and reports `ConnectionClosed` once the
/// queue is drained, which ends a receive loop deterministically.
#[derive(Debug, Default, Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    connected: bool,
    connected_url: Option<String>,
    sent: Vec<String>,
    receive_queue: VecDeque<String>,
    fail_next_connect: Option<String>,
    fail_next_send: Option<String>,
    fail_next_recv: Option<String>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue raw text to be returned by a later `recv()` call.
    pub fn queue_text(&self, text: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.receive_queue.push_back(text.into());
    }

    /// Queue an envelope to be returned by a later `recv()` call.
    pub fn queue_envelope(&self, envelope: &SignalingEnvelope) {
        let text = envelope.to_text().expect("envelope serializes");
        self.queue_text(text);
    }

    /// Get all raw messages that were sent.
    pub fn sent_messages(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.sent.clone()
    }

    /// Get all sent messages decoded as envelopes (undecodable ones skipped).
    pub fn sent_envelopes(&self) -> Vec<SignalingEnvelope> {
        self.sent_messages()
            .iter()
            .filter_map(|text| SignalingEnvelope::from_text(text).ok())
            .collect()
    }

    /// Get the last envelope that was sent.
    pub fn last_sent(&self) -> Option<SignalingEnvelope> {
        self.sent_envelopes().pop()
    }

    /// Get the URL that was connected to.
    pub fn connected_url(&self) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.connected_url.clone()
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_connect = Some(error.to_string());
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_send = Some(error.to_string());
    }

    /// Cause the next recv() to fail with the given error.
    pub fn fail_next_recv(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_recv = Some(error.to_string());
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, url: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(error) = inner.fail_next_connect.take() {
            return Err(TransportError::ConnectionFailed(error));
        }

        inner.connected = true;
        inner.connected_url = Some(url.to_string());
        Ok(())
    }

    async fn send(&self, text: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();

        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }

        inner.sent.push(text.to_string());
        Ok(())
    }

    async fn recv(&self) -> Result<String, TransportError> {
        let mut inner = self.inner.lock().unwrap();

        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        if let Some(error) = inner.fail_next_recv.take() {
            return Err(TransportError::ReceiveFailed(error));
        }

        inner
            .receive_queue
            .pop_front()
            .ok_or(TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.connected = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_types::PeerId;

    // ===========================================
    // MockTransport Basic Tests
    // ===========================================

    #[tokio::test]
    async fn records_connect_url() {
        let transport = MockTransport::new();
        assert!(!transport.is_connected());

        transport.connect("ws://relay/ws?room=r").await.unwrap();

        assert!(transport.is_connected());
        assert_eq!(
            transport.connected_url().as_deref(),
            Some("ws://relay/ws?room=r")
        );
    }

    #[tokio::test]
    async fn captures_sent_envelopes() {
        let transport = MockTransport::new();
        transport.connect("mock").await.unwrap();

        let join = SignalingEnvelope::join(PeerId::new("a"));
        transport.send(&join.to_text().unwrap()).await.unwrap();
        transport.send("not an envelope").await.unwrap();

        assert_eq!(transport.sent_messages().len(), 2);
        assert_eq!(transport.sent_envelopes(), vec![join.clone()]);
        assert_eq!(transport.last_sent(), Some(join));
    }

    #[tokio::test]
    async fn drained_queue_reports_closed() {
        let transport = MockTransport::new();
        transport.connect("mock").await.unwrap();
        transport.queue_envelope(&SignalingEnvelope::leave(PeerId::new("b")));

        let text = transport.recv().await.unwrap();
        assert!(text.contains("leave"));
        assert!(matches!(
            transport.recv().await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    // ===========================================
    // Error Condition Tests
    // ===========================================

    #[tokio::test]
    async fn send_without_connect_fails() {
        let transport = MockTransport::new();
        assert!(matches!(
            transport.send("x").await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn forced_failures_fire_once() {
        let transport = MockTransport::new();
        transport.fail_next_connect("refused");
        assert!(transport.connect("mock").await.is_err());
        transport.connect("mock").await.unwrap();

        transport.fail_next_send("full");
        assert!(matches!(
            transport.send("x").await,
            Err(TransportError::SendFailed(_))
        ));
        transport.send("x").await.unwrap();

        transport.queue_text("queued");
        transport.fail_next_recv("timeout");
        assert!(matches!(
            transport.recv().await,
            Err(TransportError::ReceiveFailed(_))
        ));
        assert_eq!(transport.recv().await.unwrap(), "queued");
    }

    #[tokio::test]
    async fn clone_shares_state() {
        let t1 = MockTransport::new();
        let t2 = t1.clone();

        t1.connect("mock").await.unwrap();
        assert!(t2.is_connected());

        t2.close().await.unwrap();
        assert!(!t1.is_connected());
    }
}
