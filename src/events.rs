use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{ChatMessage, RoomStatus};

/// Transport-agnostic application events.
/// Emitted by the room session, consumed by whatever front end is attached
/// (the interactive terminal client here).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum AppEvent {
    MessageAppended { room: String, message: ChatMessage },
    PeerJoined { room: String, participant_id: String, display_name: String },
    PeerLeft { room: String, link_id: String },
    StatusChanged { room: String, status: RoomStatus },
    ModerationApplied { room: String, participant_id: String, strike_count: u32, mute_until: i64 },
    RoomDestroyed { room: String },
    DiscoveryWarning { detail: String },
}

pub type EventSender = broadcast::Sender<AppEvent>;
pub type EventReceiver = broadcast::Receiver<AppEvent>;

pub fn create_event_bus() -> (EventSender, EventReceiver) {
    broadcast::channel(256)
}
