//! In-memory signaling links.
//!
//! [`memory_signaling`] returns a dialer and a listener. Every
//! [`MemoryTransport`] created from the dialer hands a [`MemoryAccepted`] to
//! the listener on `connect()`, just like a socket accept. Whatever serves the
//! listener (typically a relay hub in tests) reads the client's messages from
//! `inbound` and writes replies into `outbound`.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Create a connected dialer/listener pair.
pub fn memory_signaling() -> (MemoryDialer, MemoryListener) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    (MemoryDialer { accept_tx }, MemoryListener { accept_rx })
}

/// Creates transports that connect to one [`MemoryListener`].
#[derive(Debug, Clone)]
pub struct MemoryDialer {
    accept_tx: mpsc::UnboundedSender<MemoryAccepted>,
}

impl MemoryDialer {
    /// Create an unconnected transport bound to this dialer's listener.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            accept_tx: self.accept_tx.clone(),
            tx: Mutex::new(None),
            rx: tokio::sync::Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }
}

/// Receives connections made by [`MemoryTransport::connect`].
#[derive(Debug)]
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<MemoryAccepted>,
}

impl MemoryListener {
    /// Wait for the next connection. `None` once every dialer is gone.
    pub async fn accept(&mut self) -> Option<MemoryAccepted> {
        self.accept_rx.recv().await
    }
}

/// Server side of one in-memory connection.
#[derive(Debug)]
pub struct MemoryAccepted {
    /// URL the client connected to.
    pub url: String,
    /// Messages sent by the client. Ends when the client closes.
    pub inbound: mpsc::UnboundedReceiver<String>,
    /// Messages to deliver to the client. Drop to close the client's side.
    pub outbound: mpsc::UnboundedSender<String>,
}

impl MemoryAccepted {
    /// Look up a decoded query parameter of the connect URL.
    pub fn query(&self, key: &str) -> Option<String> {
        let url = url::Url::parse(&self.url).ok()?;
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }
}

/// Signaling transport over in-process channels.
#[derive(Debug)]
pub struct MemoryTransport {
    accept_tx: mpsc::UnboundedSender<MemoryAccepted>,
    tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    connected: AtomicBool,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, url: &str) -> Result<(), TransportError> {
        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();

        self.accept_tx
            .send(MemoryAccepted {
                url: url.to_string(),
                inbound: server_rx,
                outbound: server_tx,
            })
            .map_err(|_| TransportError::ConnectionFailed("listener gone".into()))?;

        *self.tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(client_tx);
        *self.rx.lock().await = Some(client_rx);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, text: &str) -> Result<(), TransportError> {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(TransportError::NotConnected)?;

        tx.send(text.to_string()).map_err(|_| {
            self.connected.store(false, Ordering::SeqCst);
            TransportError::ConnectionClosed
        })
    }

    async fn recv(&self) -> Result<String, TransportError> {
        let mut guard = self.rx.lock().await;
        let rx = guard.as_mut().ok_or(TransportError::NotConnected)?;

        match rx.recv().await {
            Some(text) => Ok(text),
            None => {
                self.connected.store(false, Ordering::SeqCst);
                Err(TransportError::ConnectionClosed)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        // Dropping the sender ends the server's inbound stream
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_hands_server_side_to_listener() {
        let (dialer, mut listener) = memory_signaling();
        let transport = dialer.transport();

        transport
            .connect("mem://relay/ws?room=office&peer_id=a%20b")
            .await
            .unwrap();
        let accepted = listener.accept().await.unwrap();

        assert!(transport.is_connected());
        assert_eq!(accepted.query("room").as_deref(), Some("office"));
        assert_eq!(accepted.query("peer_id").as_deref(), Some("a b"));
        assert_eq!(accepted.query("missing"), None);
    }

    #[tokio::test]
    async fn messages_flow_both_ways() {
        let (dialer, mut listener) = memory_signaling();
        let transport = dialer.transport();
        transport.connect("mem://relay/ws").await.unwrap();
        let mut accepted = listener.accept().await.unwrap();

        transport.send("hello").await.unwrap();
        assert_eq!(accepted.inbound.recv().await.unwrap(), "hello");

        accepted.outbound.send("world".into()).unwrap();
        assert_eq!(transport.recv().await.unwrap(), "world");
    }

    #[tokio::test]
    async fn server_drop_closes_client() {
        let (dialer, mut listener) = memory_signaling();
        let transport = dialer.transport();
        transport.connect("mem://relay/ws").await.unwrap();
        drop(listener.accept().await.unwrap());

        assert!(matches!(
            transport.recv().await,
            Err(TransportError::ConnectionClosed)
        ));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn client_close_ends_server_inbound() {
        let (dialer, mut listener) = memory_signaling();
        let transport = dialer.transport();
        transport.connect("mem://relay/ws").await.unwrap();
        let mut accepted = listener.accept().await.unwrap();

        transport.close().await.unwrap();

        assert!(accepted.inbound.recv().await.is_none());
        assert!(matches!(
            transport.send("late").await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn connect_without_listener_fails() {
        let (dialer, listener) = memory_signaling();
        drop(listener);

        let result = dialer.transport().connect("mem://relay/ws").await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }
}
