//! Mock clipboard for testing.
//!
//! Behaves like an OS clipboard: every write is reported back to watchers as
//! a change, which is exactly the echo the guard has to suppress.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use super::{ClipboardBackend, ClipboardError};

const CHANGE_BUFFER: usize = 64;

/// In-memory clipboard with change notification.
#[derive(Debug, Clone)]
pub struct MockClipboard {
    inner: Arc<Mutex<MockClipboardInner>>,
    changes: broadcast::Sender<Vec<u8>>,
}

#[derive(Debug, Default)]
struct MockClipboardInner {
    content: Vec<u8>,
    writes: Vec<Vec<u8>>,
    initialized: bool,
    fail_init: Option<String>,
    fail_next_write: Option<String>,
}

impl MockClipboard {
    /// Create an empty clipboard.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            inner: Arc::new(Mutex::new(MockClipboardInner::default())),
            changes,
        }
    }

    /// Simulate the user copying `content`.
    pub fn simulate_copy(&self, content: &[u8]) {
        self.inner.lock().unwrap().content = content.to_vec();
        let _ = self.changes.send(content.to_vec());
    }

    /// Current clipboard content.
    pub fn content(&self) -> Vec<u8> {
        self.inner.lock().unwrap().content.clone()
    }

    /// Every write made through the backend, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap().writes.clone()
    }

    /// True once `init()` succeeded.
    pub fn is_initialized(&self) -> bool {
        self.inner.lock().unwrap().initialized
    }

    /// Cause `init()` to fail with the given error.
    pub fn fail_init(&self, error: &str) {
        self.inner.lock().unwrap().fail_init = Some(error.to_string());
    }

    /// Cause the next `write()` to fail with the given error.
    pub fn fail_next_write(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_write = Some(error.to_string());
    }
}

impl Default for MockClipboard {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClipboardBackend for MockClipboard {
    async fn init(&self) -> Result<(), ClipboardError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_init.take() {
            return Err(ClipboardError::Unavailable(error));
        }
        inner.initialized = true;
        Ok(())
    }

    fn watch(&self, cancel: CancellationToken) -> mpsc::Receiver<Vec<u8>> {
        // Subscribe before spawning so no change between watch() and the
        // first poll is lost
        let mut changes = self.changes.subscribe();
        let (tx, rx) = mpsc::channel(CHANGE_BUFFER);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    change = changes.recv() => match change {
                        Ok(content) => {
                            if tx.send(content).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        rx
    }

    async fn write(&self, content: &[u8]) -> Result<(), ClipboardError> {
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(error) = inner.fail_next_write.take() {
                return Err(ClipboardError::WriteFailed(error));
            }
            inner.content = content.to_vec();
            inner.writes.push(content.to_vec());
        }
        // The OS reports our own write as a change
        let _ = self.changes.send(content.to_vec());
        Ok(())
    }
}
