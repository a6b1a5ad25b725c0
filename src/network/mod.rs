pub mod behaviour;
pub mod bootstrap;
pub mod link;
pub mod membership;
pub mod swarm;

use crate::models::{PeerInfo, RoomId, RulesPolicy};
use crate::session::SendOutcome;

/// Frames queued by peer links for the transport task to put on the wire.
#[derive(Debug)]
pub enum OutboundFrame {
    /// Fan out to every open link in the room (the mesh performs the
    /// per-peer delivery; individual send failures never abort siblings).
    Room(Vec<u8>),
    /// Addressed to a single link (greeting replies). Carried over the
    /// shared room mesh; the duplicate greetings this can produce are
    /// tolerated by the protocol.
    Link { link_id: String, bytes: Vec<u8> },
}

/// Commands sent from services to the network event loop.
#[derive(Debug)]
pub enum NetworkCommand {
    /// Enter a room: derive the topic, subscribe, announce. Returns
    /// immediately; peers may arrive after an unbounded delay.
    JoinRoom { room: RoomId, policy: RulesPolicy },
    /// Close every link and stop discovery for the active room. Idempotent.
    LeaveRoom,
    /// Broadcast teardown, wipe the local log, then leave.
    DestroyRoom,
    SendChat {
        text: String,
        reply: tokio::sync::oneshot::Sender<SendOutcome>,
    },
    PeerSnapshot {
        reply: tokio::sync::oneshot::Sender<Vec<PeerInfo>>,
    },
}
