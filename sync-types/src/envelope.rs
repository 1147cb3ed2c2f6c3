//! SignalingEnvelope - the wire format for all signaling messages.
//!
//! The wire format is a flat UTF-8 JSON record:
//!
//! ```text
//! {"type":"offer","from":"peer-a","to":"peer-b","payload":"<sdp>"}
//! ```
//!
//! `to` and `payload` are omitted when empty. An absent (or empty) `to` means
//! broadcast to every other member of the room.

use serde::{Deserialize, Deserializer, Serialize};

use crate::{PeerId, SyncError};

/// Signaling message type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeType {
    /// Announce presence to the room
    Join,
    /// Announce departure from the room
    Leave,
    /// Session description offer
    Offer,
    /// Session description answer
    Answer,
    /// ICE candidate
    Candidate,
}

impl EnvelopeType {
    /// Wire name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Candidate => "candidate",
        }
    }
}

impl std::fmt::Display for EnvelopeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A signaling envelope relayed by the room hub.
///
/// Immutable once constructed. The payload is opaque to the relay: a serialized
/// session description for offer/answer, a serialized candidate for candidate,
/// absent for join/leave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingEnvelope {
    /// Message type
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    /// Sender's peer id
    pub from: PeerId,
    /// Target peer id (None = broadcast)
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_as_none"
    )]
    pub to: Option<PeerId>,
    /// Protocol-specific payload
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_as_none"
    )]
    pub payload: Option<String>,
}

impl SignalingEnvelope {
    /// Create an envelope with every field explicit.
    ///
    /// An empty `to` or `payload` is normalized to `None`.
    pub fn new(
        kind: EnvelopeType,
        from: PeerId,
        to: Option<PeerId>,
        payload: Option<String>,
    ) -> Self {
        Self {
            kind,
            from,
            to: to.filter(|p| !p.is_empty()),
            payload: payload.filter(|p| !p.is_empty()),
        }
    }

    /// Broadcast presence to the room.
    pub fn join(from: PeerId) -> Self {
        Self::new(EnvelopeType::Join, from, None, None)
    }

    /// Broadcast departure from the room.
    pub fn leave(from: PeerId) -> Self {
        Self::new(EnvelopeType::Leave, from, None, None)
    }

    /// Targeted offer carrying a local session description.
    pub fn offer(from: PeerId, to: PeerId, sdp: impl Into<String>) -> Self {
        Self::new(EnvelopeType::Offer, from, Some(to), Some(sdp.into()))
    }

    /// Targeted answer carrying a local session description.
    pub fn answer(from: PeerId, to: PeerId, sdp: impl Into<String>) -> Self {
        Self::new(EnvelopeType::Answer, from, Some(to), Some(sdp.into()))
    }

    /// Targeted candidate.
    pub fn candidate(from: PeerId, to: PeerId, candidate: impl Into<String>) -> Self {
        Self::new(EnvelopeType::Candidate, from, Some(to), Some(candidate.into()))
    }

    /// True if this envelope has no explicit target.
    pub fn is_broadcast(&self) -> bool {
        self.to.is_none()
    }

    /// True if this envelope should be processed by `peer`.
    ///
    /// Broadcasts are for everyone; targeted envelopes only for their target.
    pub fn is_addressed_to(&self, peer: &PeerId) -> bool {
        self.to.as_ref().map_or(true, |to| to == peer)
    }

    /// Payload as a string slice (empty when absent).
    pub fn payload_str(&self) -> &str {
        self.payload.as_deref().unwrap_or("")
    }

    /// Serialize to UTF-8 JSON text.
    pub fn to_text(&self) -> Result<String, SyncError> {
        serde_json::to_string(self).map_err(SyncError::Serialization)
    }

    /// Serialize to UTF-8 JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        serde_json::to_vec(self).map_err(SyncError::Serialization)
    }

    /// Deserialize from UTF-8 JSON bytes.
    ///
    /// Fails cleanly (never panics) on malformed input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SyncError> {
        let envelope: Self = serde_json::from_slice(bytes).map_err(SyncError::Deserialization)?;
        if envelope.from.is_empty() {
            return Err(SyncError::InvalidData("empty sender peer id".into()));
        }
        Ok(envelope)
    }

    /// Deserialize from UTF-8 JSON text.
    pub fn from_text(text: &str) -> Result<Self, SyncError> {
        Self::from_bytes(text.as_bytes())
    }
}

fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: From<String>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()).map(T::from))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_omits_target_and_payload() {
        let text = SignalingEnvelope::join(PeerId::new("a")).to_text().unwrap();
        assert_eq!(text, r#"{"type":"join","from":"a"}"#);
    }

    #[test]
    fn offer_wire_format() {
        let env = SignalingEnvelope::offer(PeerId::new("a"), PeerId::new("b"), "v=0");
        let text = env.to_text().unwrap();
        assert_eq!(text, r#"{"type":"offer","from":"a","to":"b","payload":"v=0"}"#);

        let restored = SignalingEnvelope::from_text(&text).unwrap();
        assert_eq!(restored, env);
    }

    #[test]
    fn empty_target_decodes_as_broadcast() {
        let env = SignalingEnvelope::from_text(r#"{"type":"leave","from":"a","to":"","payload":""}"#)
            .unwrap();
        assert!(env.is_broadcast());
        assert!(env.payload.is_none());
    }

    #[test]
    fn constructor_normalizes_empty_fields() {
        let env = SignalingEnvelope::new(
            EnvelopeType::Candidate,
            PeerId::new("a"),
            Some(PeerId::new("")),
            Some(String::new()),
        );
        assert!(env.to.is_none());
        assert!(env.payload.is_none());
    }

    #[test]
    fn addressing() {
        let me = PeerId::new("me");
        let other = PeerId::new("other");

        assert!(SignalingEnvelope::join(other.clone()).is_addressed_to(&me));
        assert!(SignalingEnvelope::offer(other.clone(), me.clone(), "x").is_addressed_to(&me));
        assert!(!SignalingEnvelope::offer(me.clone(), other.clone(), "x").is_addressed_to(&me));
    }

    // ===========================================
    // Malformed Input Tests
    // ===========================================

    #[test]
    fn garbage_is_format_error() {
        let err = SignalingEnvelope::from_bytes(b"\x00\xffnot json").unwrap_err();
        assert!(err.is_format_error());
    }

    #[test]
    fn unknown_type_is_format_error() {
        let err = SignalingEnvelope::from_text(r#"{"type":"shout","from":"a"}"#).unwrap_err();
        assert!(err.is_format_error());
    }

    #[test]
    fn missing_sender_is_format_error() {
        assert!(SignalingEnvelope::from_text(r#"{"type":"join"}"#).is_err());
        assert!(SignalingEnvelope::from_text(r#"{"type":"join","from":""}"#).is_err());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let env = SignalingEnvelope::from_text(r#"{"type":"join","from":"a","ts":17}"#).unwrap();
        assert_eq!(env.kind, EnvelopeType::Join);
    }

    #[test]
    fn type_names_match_wire() {
        for (kind, name) in [
            (EnvelopeType::Join, "join"),
            (EnvelopeType::Leave, "leave"),
            (EnvelopeType::Offer, "offer"),
            (EnvelopeType::Answer, "answer"),
            (EnvelopeType::Candidate, "candidate"),
        ] {
            assert_eq!(kind.as_str(), name);
            assert_eq!(serde_json::to_string(&kind).unwrap(), format!("\"{name}\""));
        }
    }
}
