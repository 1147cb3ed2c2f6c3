//! Error types for the signaling codec.

use thiserror::Error;

/// Errors produced while encoding or decoding signaling envelopes.
#[derive(Debug, Error)]
pub enum SyncError {
    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Malformed envelope (not JSON, wrong shape, unknown type)
    #[error("malformed envelope: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// Envelope parsed but violates a protocol rule
    #[error("invalid envelope: {0}")]
    InvalidData(String),
}

impl SyncError {
    /// True for errors caused by malformed input (the FormatError class).
    pub fn is_format_error(&self) -> bool {
        matches!(self, Self::Deserialization(_) | Self::InvalidData(_))
    }
}
