use tokio::sync::oneshot;

use crate::models::{ChatMessage, PeerInfo, RoomId};
use crate::network::NetworkCommand;
use crate::session::SendOutcome;
use crate::state::ServiceContext;

/// Send a chat line into the active room. The outcome reports a mute or
/// violation so the front end can tell the user; everything else surfaces
/// through the event bus.
pub async fn send_chat(ctx: &ServiceContext, text: String) -> Result<SendOutcome, String> {
    let text = text.trim().to_string();
    if text.is_empty() {
        return Ok(SendOutcome::Sent);
    }
    let (tx, rx) = oneshot::channel();
    ctx.network_tx
        .send(NetworkCommand::SendChat { text, reply: tx })
        .await
        .map_err(|e| e.to_string())?;
    rx.await.map_err(|e| e.to_string())
}

pub fn chat_log(ctx: &ServiceContext, room: &RoomId) -> Result<Vec<ChatMessage>, String> {
    ctx.db.load_chat_log(room).map_err(|e| e.to_string())
}

pub async fn room_peers(ctx: &ServiceContext) -> Result<Vec<PeerInfo>, String> {
    let (tx, rx) = oneshot::channel();
    ctx.network_tx
        .send(NetworkCommand::PeerSnapshot { reply: tx })
        .await
        .map_err(|e| e.to_string())?;
    rx.await.map_err(|e| e.to_string())
}
