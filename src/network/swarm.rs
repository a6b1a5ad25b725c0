use std::sync::Arc;
use std::time::Duration;

use libp2p::futures::StreamExt;
use libp2p::identity::Keypair;
use libp2p::{
    gossipsub, identify, kad, mdns, noise, tcp, yamux, Multiaddr, PeerId, Swarm, SwarmBuilder,
    swarm::SwarmEvent,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::events::{AppEvent, EventSender};
use crate::network::behaviour::{IslandBehaviour, IslandBehaviourEvent};
use crate::network::bootstrap;
use crate::network::{NetworkCommand, OutboundFrame};
use crate::session::{RoomSession, SendOutcome};

const PROTOCOL_VERSION: &str = "island/0.1.0";

pub fn build_swarm(keypair: &Keypair) -> Result<Swarm<IslandBehaviour>, Box<dyn std::error::Error>> {
    let peer_id = PeerId::from(keypair.public());

    // GossipSub config
    let gossipsub_config = gossipsub::ConfigBuilder::default()
        .heartbeat_interval(Duration::from_secs(10))
        .validation_mode(gossipsub::ValidationMode::Strict)
        .mesh_n(2)
        .mesh_n_low(1)
        .mesh_n_high(4)
        .mesh_outbound_min(1)
        .flood_publish(true)
        .build()
        .map_err(|e| format!("GossipSub config error: {}", e))?;

    let gossipsub = gossipsub::Behaviour::new(
        gossipsub::MessageAuthenticity::Signed(keypair.clone()),
        gossipsub_config,
    )
    .map_err(|e| format!("GossipSub behaviour error: {}", e))?;

    // mDNS for LAN discovery
    let mdns = mdns::tokio::Behaviour::new(mdns::Config::default(), peer_id)?;

    // Kademlia connects us into the public rendezvous mesh
    let kademlia_config = kad::Config::new(libp2p::StreamProtocol::new("/island/kad/1.0.0"));
    let store = kad::store::MemoryStore::new(peer_id);
    let mut kademlia = kad::Behaviour::with_config(peer_id, store, kademlia_config);

    for addr in bootstrap::bootstrap_nodes() {
        if let Some(bootstrap_peer_id) = addr.iter().find_map(|p| {
            if let libp2p::multiaddr::Protocol::P2p(id) = p {
                Some(id)
            } else {
                None
            }
        }) {
            kademlia.add_address(&bootstrap_peer_id, addr.clone());
        }
    }

    // Identify protocol
    let identify = identify::Behaviour::new(identify::Config::new(
        PROTOCOL_VERSION.to_string(),
        keypair.public(),
    ));

    let swarm = SwarmBuilder::with_existing_identity(keypair.clone())
        .with_tokio()
        .with_tcp(
            tcp::Config::default(),
            noise::Config::new,
            yamux::Config::default,
        )?
        .with_quic()
        .with_behaviour(|_key| {
            Ok(IslandBehaviour {
                gossipsub,
                mdns,
                kademlia,
                identify,
            })
        })?
        .with_swarm_config(|c: libp2p::swarm::Config| {
            c.with_idle_connection_timeout(Duration::from_secs(60))
        })
        .build();

    Ok(swarm)
}

/// The active room inside the event loop. Replaced wholesale on re-join so
/// nothing from a previous room can leak into the next session.
struct ActiveRoom {
    topic: gossipsub::IdentTopic,
    topic_hash: gossipsub::TopicHash,
    session: RoomSession,
}

fn publish_frame(
    swarm: &mut Swarm<IslandBehaviour>,
    topic: &gossipsub::IdentTopic,
    frame: OutboundFrame,
) {
    let bytes = match frame {
        OutboundFrame::Room(bytes) => bytes,
        OutboundFrame::Link { bytes, .. } => bytes,
    };
    match swarm.behaviour_mut().gossipsub.publish(topic.clone(), bytes) {
        Ok(_) => {}
        Err(gossipsub::PublishError::InsufficientPeers) => {
            // Solo mode; steady state until discovery finds someone.
            debug!("no mesh peers yet on topic {}", topic);
        }
        Err(e) => warn!("failed to publish frame: {}", e),
    }
}

/// Put every already-queued frame on the wire for the room that queued it.
/// Called before a room is left, replaced, or discarded, so a parting
/// broadcast (notably `room:destroy`) is not lost and nothing queued by an
/// old session can ever land on a newer room's topic.
fn flush_outbound(
    swarm: &mut Swarm<IslandBehaviour>,
    outbound_rx: &mut mpsc::UnboundedReceiver<OutboundFrame>,
    topic: &gossipsub::IdentTopic,
) {
    while let Ok(frame) = outbound_rx.try_recv() {
        publish_frame(swarm, topic, frame);
    }
}

pub async fn run_event_loop(
    mut swarm: Swarm<IslandBehaviour>,
    mut cmd_rx: mpsc::Receiver<NetworkCommand>,
    db: Arc<Database>,
    event_tx: EventSender,
    participant_id: String,
) {
    // Listen on all interfaces
    let listen_addr_tcp: Multiaddr = "/ip4/0.0.0.0/tcp/0".parse().unwrap();
    let listen_addr_quic: Multiaddr = "/ip4/0.0.0.0/udp/0/quic-v1".parse().unwrap();

    swarm.listen_on(listen_addr_tcp).expect("Failed to listen on TCP");
    swarm.listen_on(listen_addr_quic).expect("Failed to listen on QUIC");

    if let Err(e) = swarm.behaviour_mut().kademlia.bootstrap() {
        warn!("Kademlia bootstrap failed (expected if no peers yet): {}", e);
    }

    // Frames queued by the active session's links, drained onto the wire.
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundFrame>();
    let mut active: Option<ActiveRoom> = None;

    loop {
        tokio::select! {
            event = swarm.select_next_some() => {
                match event {
                    SwarmEvent::Behaviour(IslandBehaviourEvent::Mdns(mdns::Event::Discovered(peers))) => {
                        for (peer_id, addr) in peers {
                            info!("mDNS discovered peer: {} at {}", peer_id, addr);
                            swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
                            swarm.behaviour_mut().kademlia.add_address(&peer_id, addr);
                        }
                    }
                    SwarmEvent::Behaviour(IslandBehaviourEvent::Mdns(mdns::Event::Expired(peers))) => {
                        for (peer_id, _addr) in peers {
                            info!("mDNS peer expired: {}", peer_id);
                            swarm.behaviour_mut().gossipsub.remove_explicit_peer(&peer_id);
                        }
                    }
                    SwarmEvent::Behaviour(IslandBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                        message,
                        propagation_source,
                        ..
                    })) => {
                        // The link a frame arrives on is the directly
                        // connected peer, not the original author; authorship
                        // only ever comes from the envelope.
                        if let Some(room) = active.as_mut() {
                            if message.topic == room.topic_hash {
                                room.session.on_frame(&propagation_source.to_string(), &message.data);
                            } else {
                                debug!("dropping frame for inactive topic {}", message.topic);
                            }
                        }
                    }
                    SwarmEvent::Behaviour(IslandBehaviourEvent::Gossipsub(gossipsub::Event::Subscribed {
                        peer_id,
                        topic,
                    })) => {
                        if let Some(room) = active.as_mut() {
                            if topic == room.topic_hash {
                                info!("peer {} joined the room swarm", peer_id);
                                room.session.on_peer_subscribed(&peer_id.to_string());
                            }
                        }
                    }
                    SwarmEvent::Behaviour(IslandBehaviourEvent::Gossipsub(gossipsub::Event::Unsubscribed {
                        peer_id,
                        topic,
                    })) => {
                        if let Some(room) = active.as_mut() {
                            if topic == room.topic_hash {
                                info!("peer {} left the room swarm", peer_id);
                                room.session.on_link_closed(&peer_id.to_string());
                            }
                        }
                    }
                    SwarmEvent::Behaviour(IslandBehaviourEvent::Identify(identify::Event::Received {
                        peer_id,
                        info,
                        ..
                    })) => {
                        debug!("identified peer: {} running {}", peer_id, info.protocol_version);
                        for addr in info.listen_addrs {
                            swarm.behaviour_mut().kademlia.add_address(&peer_id, addr);
                        }
                    }
                    SwarmEvent::NewListenAddr { address, .. } => {
                        info!("Listening on {}", address);
                    }
                    SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                        debug!("Connected to {}", peer_id);
                        if let Some(room) = active.as_mut() {
                            room.session.on_peer_connected(&peer_id.to_string());
                        }
                    }
                    SwarmEvent::ConnectionClosed { peer_id, .. } => {
                        debug!("Disconnected from {}", peer_id);
                        if let Some(room) = active.as_mut() {
                            room.session.on_link_closed(&peer_id.to_string());
                        }
                    }
                    SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                        // Dial failures against a public mesh are routine.
                        debug!("outgoing connection error ({:?}): {}", peer_id, error);
                    }
                    SwarmEvent::ListenerError { error, .. } => {
                        warn!("listener error: {}", error);
                        let _ = event_tx.send(AppEvent::DiscoveryWarning {
                            detail: error.to_string(),
                        });
                    }
                    _ => {}
                }
            }
            Some(frame) = outbound_rx.recv() => {
                if let Some(room) = active.as_ref() {
                    let topic = room.topic.clone();
                    publish_frame(&mut swarm, &topic, frame);
                } else {
                    debug!("dropping outbound frame, no active room");
                }
            }
            Some(cmd) = cmd_rx.recv() => {
                match cmd {
                    NetworkCommand::JoinRoom { room, policy } => {
                        // Entering a room always tears the previous session
                        // down first; events from a left room must never
                        // reach a later one.
                        if let Some(mut old) = active.take() {
                            old.session.leave();
                            flush_outbound(&mut swarm, &mut outbound_rx, &old.topic);
                            let _ = swarm.behaviour_mut().gossipsub.unsubscribe(&old.topic);
                        }
                        let topic = gossipsub::IdentTopic::new(room.topic());
                        match swarm.behaviour_mut().gossipsub.subscribe(&topic) {
                            Ok(_) => info!("joined room {} (topic {})", room, topic),
                            Err(e) => {
                                // Still usable in solo mode; the session can
                                // recover if discovery comes back.
                                warn!("failed to subscribe for room {}: {}", room, e);
                                let _ = event_tx.send(AppEvent::DiscoveryWarning {
                                    detail: e.to_string(),
                                });
                            }
                        }
                        let topic_hash = topic.hash();
                        let mut session = RoomSession::new(
                            room,
                            participant_id.clone(),
                            policy,
                            db.clone(),
                            event_tx.clone(),
                            outbound_tx.clone(),
                        );
                        session.announce();
                        active = Some(ActiveRoom { topic, topic_hash, session });
                    }
                    NetworkCommand::LeaveRoom => {
                        if let Some(mut old) = active.take() {
                            old.session.leave();
                            flush_outbound(&mut swarm, &mut outbound_rx, &old.topic);
                            let _ = swarm.behaviour_mut().gossipsub.unsubscribe(&old.topic);
                            info!("left room {}", old.session.room());
                        }
                    }
                    NetworkCommand::DestroyRoom => {
                        if let Some(room) = active.as_mut() {
                            room.session.destroy();
                        }
                    }
                    NetworkCommand::SendChat { text, reply } => {
                        let outcome = match active.as_mut() {
                            Some(room) => room.session.send_chat(&text),
                            None => SendOutcome::NotInRoom,
                        };
                        let _ = reply.send(outcome);
                    }
                    NetworkCommand::PeerSnapshot { reply } => {
                        let peers = active
                            .as_ref()
                            .map(|room| room.session.participants())
                            .unwrap_or_default();
                        let _ = reply.send(peers);
                    }
                }
            }
        }

        // A session that tore itself down while handling the event above is
        // discarded here, before the next event is polled. Its queued
        // frames (the teardown broadcast) go out first.
        if active.as_ref().map(|room| room.session.is_destroyed()).unwrap_or(false) {
            if let Some(room) = active.take() {
                flush_outbound(&mut swarm, &mut outbound_rx, &room.topic);
                let _ = swarm.behaviour_mut().gossipsub.unsubscribe(&room.topic);
                info!("room {} destroyed", room.session.room());
            }
        }
    }
}
