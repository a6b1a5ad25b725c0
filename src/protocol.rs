//! Wire envelope for everything exchanged over a peer link.
//!
//! The envelope is a UTF-8 JSON object tagged by a `t` field. Decoders must
//! ignore unknown extra fields, map unknown tags to [`Envelope::Ignored`],
//! and discard malformed input with a log line rather than surfacing an
//! error to the session.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Handshake sent once per newly-open link by both sides, and once more in
/// reply to the first greeting received on a link. Duplicates are harmless
/// and tolerated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Greeting {
    pub participant_id: String,
    pub display_name: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatFrame {
    pub participant_id: String,
    pub display_name: String,
    pub text: String,
    pub timestamp: i64,
}

/// A gossip verdict: one node decided to mute `participant_id` and tells
/// everyone else so they converge without re-deriving the decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationNotice {
    pub participant_id: String,
    pub mute_until: i64,
    pub strike_count: u32,
}

/// The four message kinds plus an explicit no-op for tags this version does
/// not know about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Envelope {
    #[serde(rename = "hello")]
    Hello(Greeting),
    #[serde(rename = "chat")]
    Chat(ChatFrame),
    #[serde(rename = "moderate")]
    Moderate(ModerationNotice),
    #[serde(rename = "room:destroy")]
    RoomDestroy,
    #[serde(other)]
    Ignored,
}

/// Encode an envelope for the wire. `Ignored` has no wire form and encodes
/// to `None`; every other kind serializes deterministically.
pub fn encode(envelope: &Envelope) -> Option<Vec<u8>> {
    if matches!(envelope, Envelope::Ignored) {
        return None;
    }
    match serde_json::to_vec(envelope) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!("failed to encode envelope: {}", e);
            None
        }
    }
}

/// Decode bytes received on a link. Malformed input is discarded with a
/// warning; unknown `t` tags come back as `Envelope::Ignored`.
pub fn decode(bytes: &[u8]) -> Option<Envelope> {
    match serde_json::from_slice::<Envelope>(bytes) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            warn!("discarding malformed envelope ({} bytes): {}", bytes.len(), e);
            None
        }
    }
}
