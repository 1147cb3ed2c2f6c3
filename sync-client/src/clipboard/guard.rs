//! Echo-cancelling wrapper around a clipboard backend.

use std::sync::{Arc, Mutex};

use sync_core::EchoFilter;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ClipboardBackend, ClipboardError};

/// Guards the single local clipboard.
///
/// Writes go through [`write_safely`](Self::write_safely), which records the
/// content before touching the OS. Change events pass through
/// [`should_ignore`](Self::should_ignore), so the OS echo of a guarded write
/// is never mistaken for a user copy. Both paths share one lock.
pub struct ClipboardGuard<C: ClipboardBackend> {
    backend: C,
    filter: Arc<Mutex<EchoFilter>>,
}

impl<C: ClipboardBackend> ClipboardGuard<C> {
    /// Wrap a backend.
    pub fn new(backend: C) -> Self {
        Self {
            backend,
            filter: Arc::new(Mutex::new(EchoFilter::new())),
        }
    }

    /// Initialize the underlying clipboard.
    pub async fn init(&self) -> Result<(), ClipboardError> {
        self.backend.init().await
    }

    /// Write content that came from a remote peer.
    pub async fn write_safely(&self, content: &[u8]) -> Result<(), ClipboardError> {
        // Record first: the OS may report the change before write() returns
        lock(&self.filter).record_write(content);
        self.backend.write(content).await
    }

    /// True if `content` is an echo of the last known clipboard value.
    ///
    /// A non-echo becomes the new last known value.
    pub fn should_ignore(&self, content: &[u8]) -> bool {
        lock(&self.filter).should_ignore(content)
    }

    /// Watch for genuine local changes until `cancel` fires.
    pub fn watch(&self, cancel: CancellationToken) -> ClipboardChanges {
        ClipboardChanges {
            raw: self.backend.watch(cancel),
            filter: Arc::clone(&self.filter),
        }
    }

    /// Access the wrapped backend.
    pub fn backend(&self) -> &C {
        &self.backend
    }
}

impl<C: ClipboardBackend> std::fmt::Debug for ClipboardGuard<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClipboardGuard")
            .field("filter", &*lock(&self.filter))
            .finish()
    }
}

/// Stream of clipboard changes that are not echoes of guarded writes.
pub struct ClipboardChanges {
    raw: mpsc::Receiver<Vec<u8>>,
    filter: Arc<Mutex<EchoFilter>>,
}

impl ClipboardChanges {
    /// Next genuine change, or `None` once the watcher stopped.
    pub async fn next(&mut self) -> Option<Vec<u8>> {
        loop {
            let content = self.raw.recv().await?;
            if lock(&self.filter).should_ignore(&content) {
                debug!(bytes = content.len(), "suppressed clipboard echo");
                continue;
            }
            return Some(content);
        }
    }
}

fn lock(filter: &Mutex<EchoFilter>) -> std::sync::MutexGuard<'_, EchoFilter> {
    // EchoFilter has no invariants a panic could break
    filter.lock().unwrap_or_else(|e| e.into_inner())
}
