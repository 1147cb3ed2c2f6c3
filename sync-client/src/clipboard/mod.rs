//! Local clipboard access for clipsync.
//!
//! The OS clipboard is an external collaborator behind [`ClipboardBackend`].
//! [`ClipboardGuard`] wraps a backend and adds echo cancellation so writes
//! made on behalf of remote peers are never re-broadcast.

mod guard;
mod mock;

pub use guard::{ClipboardChanges, ClipboardGuard};
pub use mock::MockClipboard;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Clipboard errors.
#[derive(Debug, Error)]
pub enum ClipboardError {
    /// The clipboard could not be opened.
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),

    /// Reading the clipboard failed.
    #[error("clipboard read failed: {0}")]
    ReadFailed(String),

    /// Writing the clipboard failed.
    #[error("clipboard write failed: {0}")]
    WriteFailed(String),
}

/// Raw access to one clipboard.
#[async_trait]
pub trait ClipboardBackend: Send + Sync + 'static {
    /// Prepare the clipboard for use. Called once before `watch`.
    async fn init(&self) -> Result<(), ClipboardError>;

    /// Start watching for changes.
    ///
    /// The receiver yields the full text of every change and ends only after
    /// `cancel` fires. Calling `watch` twice starts two independent watchers.
    fn watch(&self, cancel: CancellationToken) -> mpsc::Receiver<Vec<u8>>;

    /// Replace the clipboard content.
    async fn write(&self, content: &[u8]) -> Result<(), ClipboardError>;
}
