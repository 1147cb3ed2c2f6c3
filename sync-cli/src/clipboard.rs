//! System clipboard backend (arboard), polled for changes.

use std::time::Duration;

use arboard::Clipboard;
use async_trait::async_trait;
use sync_client::{ClipboardBackend, ClipboardError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const CHANGE_BUFFER: usize = 16;

/// The OS clipboard, text only.
#[derive(Debug, Clone)]
pub struct SystemClipboard {
    poll_interval: Duration,
}

impl SystemClipboard {
    /// Create a backend that checks for changes every `poll_interval`.
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

async fn read_text() -> Result<Option<String>, ClipboardError> {
    tokio::task::spawn_blocking(|| {
        let mut clipboard =
            Clipboard::new().map_err(|e| ClipboardError::Unavailable(e.to_string()))?;
        match clipboard.get_text() {
            Ok(text) => Ok(Some(text)),
            // Empty or non-text content
            Err(arboard::Error::ContentNotAvailable) => Ok(None),
            Err(e) => Err(ClipboardError::ReadFailed(e.to_string())),
        }
    })
    .await
    .map_err(|e| ClipboardError::ReadFailed(e.to_string()))?
}

#[async_trait]
impl ClipboardBackend for SystemClipboard {
    async fn init(&self) -> Result<(), ClipboardError> {
        read_text().await.map(|_| ())
    }

    fn watch(&self, cancel: CancellationToken) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(CHANGE_BUFFER);
        let interval = self.poll_interval;

        tokio::spawn(async move {
            // Content present at startup is not a change
            let mut last = read_text().await.ok().flatten();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let current = match read_text().await {
                    Ok(current) => current,
                    Err(e) => {
                        tracing::debug!("clipboard poll failed: {}", e);
                        continue;
                    }
                };
                if current.is_some() && current != last {
                    last = current.clone();
                    if let Some(text) = current {
                        if tx.send(text.into_bytes()).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        rx
    }

    async fn write(&self, content: &[u8]) -> Result<(), ClipboardError> {
        let text = String::from_utf8(content.to_vec())
            .map_err(|_| ClipboardError::WriteFailed("payload is not UTF-8 text".into()))?;

        tokio::task::spawn_blocking(move || {
            let mut clipboard =
                Clipboard::new().map_err(|e| ClipboardError::Unavailable(e.to_string()))?;
            clipboard
                .set_text(text)
                .map_err(|e| ClipboardError::WriteFailed(e.to_string()))
        })
        .await
        .map_err(|e| ClipboardError::WriteFailed(e.to_string()))?
    }
}
