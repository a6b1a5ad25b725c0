use libp2p::{gossipsub, identify, kad, mdns, swarm::NetworkBehaviour};

#[derive(NetworkBehaviour)]
pub struct IslandBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub mdns: mdns::tokio::Behaviour,
    pub kademlia: kad::Behaviour<kad::store::MemoryStore>,
    pub identify: identify::Behaviour,
}
