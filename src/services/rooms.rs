use chrono::Utc;

use crate::models::{Room, RoomId};
use crate::network::NetworkCommand;
use crate::rules;
use crate::state::ServiceContext;

/// Create a room: mint a fresh code, remember it locally, enter it.
pub async fn create_room(ctx: &ServiceContext) -> Result<Room, String> {
    let code = RoomId::generate();
    let nick = ctx.db.get_display_name().map_err(|e| e.to_string())?;
    let room = Room {
        code: code.clone(),
        title: format!("{}'s island", nick),
        created_at: Utc::now().to_rfc3339(),
    };
    ctx.db.upsert_room(&room).map_err(|e| e.to_string())?;
    enter_room(ctx, code).await?;
    Ok(room)
}

/// Join a room by its code. Entry returns as soon as discovery starts;
/// peers may surface much later and "searching" is a steady state, not a
/// failure.
pub async fn join_room(ctx: &ServiceContext, input: &str) -> Result<RoomId, String> {
    let code = RoomId::parse(input)?;
    enter_room(ctx, code.clone()).await?;
    Ok(code)
}

/// The rules document is fetched once per room entry; an unreachable rules
/// host degrades to permissive defaults instead of blocking the join.
async fn enter_room(ctx: &ServiceContext, room: RoomId) -> Result<(), String> {
    let policy = rules::load_policy(ctx.rules_url.as_deref()).await;
    ctx.network_tx
        .send(NetworkCommand::JoinRoom { room, policy })
        .await
        .map_err(|e| e.to_string())
}

pub async fn leave_room(ctx: &ServiceContext) -> Result<(), String> {
    ctx.network_tx
        .send(NetworkCommand::LeaveRoom)
        .await
        .map_err(|e| e.to_string())
}

pub async fn destroy_room(ctx: &ServiceContext) -> Result<(), String> {
    ctx.network_tx
        .send(NetworkCommand::DestroyRoom)
        .await
        .map_err(|e| e.to_string())
}

pub fn list_rooms(ctx: &ServiceContext) -> Result<Vec<Room>, String> {
    ctx.db.list_rooms().map_err(|e| e.to_string())
}
