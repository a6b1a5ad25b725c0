//! One direct bidirectional channel to one remote participant.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::network::OutboundFrame;
use crate::protocol::{self, Envelope};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Open,
    Closed,
}

/// A peer link. The link id comes from the discovery layer and is not
/// trusted as a participant identity until a greeting arrives; the bound
/// participant is recorded here once it does. Links are owned exclusively
/// by the membership registry and removed from it the moment they close.
#[derive(Debug)]
pub struct PeerLink {
    pub id: String,
    state: LinkState,
    pub participant_id: Option<String>,
    pub display_name: Option<String>,
    /// We already replied to this link's greeting.
    pub greeted: bool,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
}

impl PeerLink {
    pub fn new(id: String, outbound: mpsc::UnboundedSender<OutboundFrame>) -> PeerLink {
        PeerLink {
            id,
            state: LinkState::Connecting,
            participant_id: None,
            display_name: None,
            greeted: false,
            outbound,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == LinkState::Open
    }

    pub fn open(&mut self) {
        if self.state == LinkState::Connecting {
            self.state = LinkState::Open;
        }
    }

    /// Idempotent; a closed link stays closed.
    pub fn close(&mut self) {
        self.state = LinkState::Closed;
    }

    /// Best-effort send. A frame dropped because the link is not open (or
    /// the transport task is gone) is logged and reported as `false`; it
    /// never propagates an error into caller logic.
    pub fn send(&self, envelope: &Envelope) -> bool {
        if !self.is_open() {
            debug!("dropping frame for link {}: not open", self.id);
            return false;
        }
        let Some(bytes) = protocol::encode(envelope) else {
            return false;
        };
        let frame = OutboundFrame::Link { link_id: self.id.clone(), bytes };
        if let Err(e) = self.outbound.send(frame) {
            warn!("dropping frame for link {}: {}", self.id, e);
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Greeting;

    fn hello() -> Envelope {
        Envelope::Hello(Greeting {
            participant_id: "u".into(),
            display_name: "n".into(),
            timestamp: 0,
        })
    }

    #[test]
    fn send_is_silently_dropped_unless_open() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut link = PeerLink::new("l1".into(), tx);

        assert!(!link.send(&hello()));
        assert!(rx.try_recv().is_err());

        link.open();
        assert!(link.send(&hello()));
        assert!(matches!(rx.try_recv().unwrap(), OutboundFrame::Link { link_id, .. } if link_id == "l1"));

        link.close();
        assert!(!link.send(&hello()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn close_is_idempotent_and_terminal() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut link = PeerLink::new("l1".into(), tx);
        link.open();
        link.close();
        link.close();
        assert_eq!(link.state(), LinkState::Closed);
        // A closed link never reopens.
        link.open();
        assert_eq!(link.state(), LinkState::Closed);
    }

    #[test]
    fn send_survives_a_dead_transport_task() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut link = PeerLink::new("l1".into(), tx);
        link.open();
        drop(rx);
        assert!(!link.send(&hello()));
    }
}
