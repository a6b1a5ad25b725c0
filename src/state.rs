use std::sync::Arc;

use tokio::sync::mpsc;

use crate::db::Database;
use crate::events::EventSender;
use crate::network::NetworkCommand;

/// Transport-agnostic context shared by services and the attached front end.
#[derive(Clone)]
pub struct ServiceContext {
    pub db: Arc<Database>,
    pub participant_id: String,
    pub network_tx: mpsc::Sender<NetworkCommand>,
    pub event_tx: EventSender,
    /// Where to fetch the room rules document from; `None` means run with
    /// the permissive defaults.
    pub rules_url: Option<String>,
}
