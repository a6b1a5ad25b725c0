use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Suffix appended to every display name, as in the original service.
pub const NICK_SUFFIX: &str = "iSLAND";

/// Milliseconds since the Unix epoch; the clock used for wire timestamps,
/// spam windows and mute deadlines.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ============================================================
// Room identity
// ============================================================

/// A 9-ASCII-digit room code. The code is the only thing participants share
/// to meet each other; it is never sent over the wire itself, only its
/// derived topic is announced to the rendezvous mesh.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub const LEN: usize = 9;

    /// Parse user input into a room code. Numeric input shorter than nine
    /// digits is zero-padded on the left, matching how codes are displayed.
    pub fn parse(input: &str) -> Result<RoomId, String> {
        let trimmed = input.trim();
        if trimmed.is_empty()
            || trimmed.len() > Self::LEN
            || !trimmed.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(format!("room code must be 1-9 decimal digits, got {:?}", input));
        }
        Ok(RoomId(format!("{:0>9}", trimmed)))
    }

    /// Draw a fresh random room code.
    pub fn generate() -> RoomId {
        use rand::Rng;
        let n: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
        RoomId(format!("{:09}", n))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Discovery topic for this room: SHA-256 of `"island:" + code`, hex.
    /// Two sessions entering the same code must land on the same topic.
    pub fn topic(&self) -> String {
        let digest = Sha256::digest(format!("island:{}", self.0).as_bytes());
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================
// Local identity and rooms
// ============================================================

/// The device-local participant identity. The id is an opaque uuid, not a
/// cryptographic credential; any peer can claim any id (accepted trust
/// boundary of the leaderless design).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub participant_id: String,
    pub display_name: String,
}

/// A locally-known room: the code plus cosmetic bookkeeping. Titles are
/// device-local and never gossiped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub code: RoomId,
    pub title: String,
    pub created_at: String,
}

// ============================================================
// Chat log
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Chat,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Chat => "chat",
            MessageKind::System => "system",
        }
    }

    pub fn from_str(s: &str) -> MessageKind {
        match s {
            "system" => MessageKind::System,
            _ => MessageKind::Chat,
        }
    }
}

/// One line of the per-room, append-only chat log. Ordering is local
/// arrival order; there is no swarm-wide order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub participant_id: String,
    pub display_name: String,
    pub text: String,
    pub timestamp: i64,
    pub kind: MessageKind,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> ChatMessage {
        ChatMessage {
            participant_id: String::new(),
            display_name: String::new(),
            text: text.into(),
            timestamp: now_ms(),
            kind: MessageKind::System,
        }
    }
}

// ============================================================
// Moderation state
// ============================================================

/// Device-scoped sanction state for one participant. Never deleted; a
/// record whose `mute_until` lies in the past is simply inert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModerationRecord {
    pub strike_count: u32,
    pub mute_until: i64,
}

/// Transient rate-limit window for one participant. In-memory only.
#[derive(Debug, Clone)]
pub struct SpamWindow {
    pub count: u32,
    pub window_start: i64,
}

// ============================================================
// Rules policy
// ============================================================

/// Room rules as served by the policy collaborator. The document shape is
/// the original `rules.json`; every field is defaulted so partial documents
/// parse and an unreachable rules host degrades to the permissive default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RulesPolicy {
    pub banned_words: Vec<String>,
    pub spam: SpamRules,
    pub mute_durations_minutes: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpamRules {
    pub max_messages_per10s: u32,
}

impl Default for RulesPolicy {
    /// Permissive: no banned words, effectively unlimited rate, muting
    /// disabled. The engine must keep chat usable under this policy.
    fn default() -> RulesPolicy {
        RulesPolicy {
            banned_words: Vec::new(),
            spam: SpamRules::default(),
            mute_durations_minutes: Vec::new(),
        }
    }
}

impl Default for SpamRules {
    fn default() -> SpamRules {
        SpamRules { max_messages_per10s: u32::MAX }
    }
}

// ============================================================
// Membership
// ============================================================

/// What we know about one connected link. The participant identity stays
/// `None` until the first greeting arrives on the link.
#[derive(Debug, Clone, Serialize)]
pub struct PeerInfo {
    pub link_id: String,
    pub participant_id: Option<String>,
    pub display_name: Option<String>,
}

/// Room connectivity as surfaced to the user. "Searching" is a steady
/// state, not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RoomStatus {
    Searching,
    Connected { peers: usize },
    Destroyed,
}
