//! Registry of peer links for the active room.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::models::PeerInfo;
use crate::network::link::PeerLink;
use crate::network::OutboundFrame;
use crate::protocol::{self, Envelope};

/// Owns every [`PeerLink`] of the active room, keyed by link id. Closing a
/// link removes it synchronously, so a closed link is never visible to a
/// subsequent broadcast.
pub struct Membership {
    links: HashMap<String, PeerLink>,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
}

impl Membership {
    pub fn new(outbound: mpsc::UnboundedSender<OutboundFrame>) -> Membership {
        Membership {
            links: HashMap::new(),
            outbound,
        }
    }

    /// Register a link the discovery layer connected. No-op if present.
    pub fn insert_connecting(&mut self, link_id: &str) {
        self.links
            .entry(link_id.to_string())
            .or_insert_with(|| PeerLink::new(link_id.to_string(), self.outbound.clone()));
    }

    /// Mark a link open (creating it if discovery skipped the connecting
    /// notification). Returns true when the link newly became open.
    pub fn open(&mut self, link_id: &str) -> bool {
        self.insert_connecting(link_id);
        let link = self.links.get_mut(link_id).expect("just inserted");
        if link.is_open() {
            return false;
        }
        link.open();
        link.is_open()
    }

    /// Close and remove a link. Idempotent; returns the removed link.
    pub fn close(&mut self, link_id: &str) -> Option<PeerLink> {
        let mut link = self.links.remove(link_id)?;
        link.close();
        Some(link)
    }

    /// Close every link and empty the registry.
    pub fn close_all(&mut self) {
        for (_, mut link) in self.links.drain() {
            link.close();
        }
    }

    pub fn get_mut(&mut self, link_id: &str) -> Option<&mut PeerLink> {
        self.links.get_mut(link_id)
    }

    /// Bind the participant identity carried by a greeting to its link.
    /// Returns true on the first bind for this link.
    pub fn bind_participant(&mut self, link_id: &str, participant_id: &str, name: &str) -> bool {
        let Some(link) = self.links.get_mut(link_id) else {
            return false;
        };
        let newly_bound = link.participant_id.is_none();
        link.participant_id = Some(participant_id.to_string());
        link.display_name = Some(name.to_string());
        newly_bound
    }

    /// Best-effort broadcast to every open link. The room mesh carries one
    /// frame to all of them; a peer the mesh fails to reach is that peer's
    /// problem, not the broadcast's.
    pub fn broadcast(&self, envelope: &Envelope) -> bool {
        let Some(bytes) = protocol::encode(envelope) else {
            return false;
        };
        if self.open_count() == 0 {
            debug!("broadcasting with no open links (solo mode)");
        }
        if let Err(e) = self.outbound.send(OutboundFrame::Room(bytes)) {
            warn!("broadcast dropped: {}", e);
            return false;
        }
        true
    }

    pub fn open_count(&self) -> usize {
        self.links.values().filter(|l| l.is_open()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn participants(&self) -> Vec<PeerInfo> {
        self.links
            .values()
            .filter(|l| l.is_open())
            .map(|l| PeerInfo {
                link_id: l.id.clone(),
                participant_id: l.participant_id.clone(),
                display_name: l.display_name.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Greeting;

    fn membership() -> (Membership, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Membership::new(tx), rx)
    }

    fn hello() -> Envelope {
        Envelope::Hello(Greeting {
            participant_id: "u".into(),
            display_name: "n".into(),
            timestamp: 0,
        })
    }

    #[test]
    fn open_reports_only_the_first_transition() {
        let (mut m, _rx) = membership();
        assert!(m.open("l1"));
        assert!(!m.open("l1"));
        assert_eq!(m.open_count(), 1);
    }

    #[test]
    fn close_removes_synchronously_and_is_idempotent() {
        let (mut m, _rx) = membership();
        m.open("l1");
        assert!(m.close("l1").is_some());
        assert!(m.close("l1").is_none());
        assert!(m.is_empty());
        assert_eq!(m.open_count(), 0);
    }

    #[test]
    fn a_closed_link_never_reaches_broadcast() {
        let (mut m, mut rx) = membership();
        m.open("l1");
        m.close("l1");
        m.broadcast(&hello());
        // The one queued frame is the room broadcast itself; no link frame
        // for the closed link exists.
        assert!(matches!(rx.try_recv().unwrap(), OutboundFrame::Room(_)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn broadcast_works_in_solo_mode() {
        let (m, mut rx) = membership();
        assert!(m.broadcast(&hello()));
        assert!(matches!(rx.try_recv().unwrap(), OutboundFrame::Room(_)));
    }

    #[test]
    fn bind_participant_reports_first_bind_only() {
        let (mut m, _rx) = membership();
        m.open("l1");
        assert!(m.bind_participant("l1", "u-1", "niSLAND"));
        assert!(!m.bind_participant("l1", "u-1", "niSLAND"));
        assert!(!m.bind_participant("ghost", "u-2", "x"));

        let peers = m.participants();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].participant_id.as_deref(), Some("u-1"));
    }

    #[test]
    fn connecting_links_are_not_counted_as_members() {
        let (mut m, _rx) = membership();
        m.insert_connecting("l1");
        assert_eq!(m.open_count(), 0);
        assert!(m.participants().is_empty());
        assert!(!m.is_empty());
    }
}
