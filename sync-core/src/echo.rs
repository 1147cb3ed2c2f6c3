//! Echo suppression for clipboard writes.
//!
//! When a remote payload is written to the local clipboard, the OS reports
//! that write back as a local change. Re-broadcasting it would bounce the
//! content around the room forever. [`EchoFilter`] remembers the last content
//! known to be on the clipboard so the watcher can tell echoes from real
//! user copies.
//!
//! The filter is pure: callers own the locking. In sync-client it sits behind
//! a mutex shared by the watcher loop and the inbound delivery path.

use std::fmt;

/// Tracks the last clipboard content this process knows about.
///
/// Starts out empty, so an empty clipboard reported at startup is not
/// broadcast.
#[derive(Clone, Default)]
pub struct EchoFilter {
    last_known: Vec<u8>,
}

impl EchoFilter {
    /// Create a filter with empty last-known content.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record content that is about to be written to the clipboard.
    ///
    /// Must be called *before* the write so the resulting change
    /// notification is already recognized as an echo.
    pub fn record_write(&mut self, content: &[u8]) {
        self.last_known.clear();
        self.last_known.extend_from_slice(content);
    }

    /// Decide whether an observed clipboard change should be suppressed.
    ///
    /// Returns `true` when `content` equals the last known content. Otherwise
    /// the content becomes the new last-known value and `false` is returned.
    pub fn should_ignore(&mut self, content: &[u8]) -> bool {
        if self.last_known == content {
            return true;
        }
        self.record_write(content);
        false
    }

    /// The content currently considered to be on the clipboard.
    pub fn last_known(&self) -> &[u8] {
        &self.last_known
    }
}

impl fmt::Debug for EchoFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Clipboard content never goes to logs
        f.debug_struct("EchoFilter")
            .field("last_known_len", &self.last_known.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_filter_ignores_empty_content() {
        let mut filter = EchoFilter::new();
        assert!(filter.should_ignore(b""));
        assert!(filter.last_known().is_empty());
    }

    #[test]
    fn first_user_copy_passes() {
        let mut filter = EchoFilter::new();
        assert!(!filter.should_ignore(b"hello"));
        assert_eq!(filter.last_known(), b"hello");
    }

    #[test]
    fn repeated_observation_is_ignored() {
        let mut filter = EchoFilter::new();
        assert!(!filter.should_ignore(b"hello"));
        assert!(filter.should_ignore(b"hello"));
    }

    #[test]
    fn recorded_write_is_ignored_once_observed() {
        let mut filter = EchoFilter::new();
        filter.record_write(b"from remote");

        assert!(filter.should_ignore(b"from remote"));
    }

    #[test]
    fn new_content_after_write_passes() {
        let mut filter = EchoFilter::new();
        filter.record_write(b"from remote");

        assert!(!filter.should_ignore(b"typed locally"));
        assert_eq!(filter.last_known(), b"typed locally");
        // Going back to the remote content is a genuine change now
        assert!(!filter.should_ignore(b"from remote"));
    }

    #[test]
    fn debug_hides_content() {
        let mut filter = EchoFilter::new();
        filter.record_write(b"secret");
        let debug = format!("{:?}", filter);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("last_known_len"));
    }
}
