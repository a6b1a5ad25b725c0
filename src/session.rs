//! Orchestration for one active room: wires link events into the
//! moderation engine and the chat log, and user intents out to broadcast.
//!
//! A session is driven entirely from the network event loop, one event at a
//! time; nothing here blocks or awaits. Once destroyed, a session is
//! terminal: the event loop discards it and a fresh join builds a new one.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::db::Database;
use crate::events::{AppEvent, EventSender};
use crate::models::{
    now_ms, ChatMessage, MessageKind, ModerationRecord, PeerInfo, RoomId, RoomStatus, RulesPolicy,
};
use crate::moderation::{ModerationEngine, Verdict};
use crate::network::membership::Membership;
use crate::network::OutboundFrame;
use crate::protocol::{self, ChatFrame, Envelope, Greeting, ModerationNotice};

/// What became of a locally-sent chat line. Callers surface `Muted` as
/// "you are temporarily muted, N remaining"; everything else is silent or
/// already visible through the event bus.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Sent,
    Muted { remaining_ms: i64 },
    Violated { muted_for_ms: i64 },
    NotInRoom,
}

pub struct RoomSession {
    room: RoomId,
    participant_id: String,
    db: Arc<Database>,
    engine: ModerationEngine,
    membership: Membership,
    event_tx: EventSender,
    destroyed: bool,
}

impl RoomSession {
    pub fn new(
        room: RoomId,
        participant_id: String,
        policy: RulesPolicy,
        db: Arc<Database>,
        event_tx: EventSender,
        outbound: mpsc::UnboundedSender<OutboundFrame>,
    ) -> RoomSession {
        let mut session = RoomSession {
            room,
            participant_id,
            engine: ModerationEngine::new(policy, db.clone()),
            membership: Membership::new(outbound),
            db,
            event_tx,
            destroyed: false,
        };
        session.append(ChatMessage::system("joined the island"));
        session.emit_status();
        session
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn participants(&self) -> Vec<PeerInfo> {
        self.membership.participants()
    }

    /// Best-effort greeting to whoever is already on the topic. The real
    /// handshake happens per link as peers surface.
    pub fn announce(&mut self) {
        let greeting = self.greeting();
        self.membership.broadcast(&greeting);
    }

    pub fn on_peer_connected(&mut self, link_id: &str) {
        if self.destroyed {
            return;
        }
        self.membership.insert_connecting(link_id);
    }

    /// A peer surfaced on the room topic: its link is open. Send our
    /// greeting, unsolicited, once per newly-open link.
    pub fn on_peer_subscribed(&mut self, link_id: &str) {
        if self.destroyed {
            return;
        }
        if self.membership.open(link_id) {
            let greeting = self.greeting();
            if let Some(link) = self.membership.get_mut(link_id) {
                link.send(&greeting);
            }
            self.emit_status();
        }
    }

    /// Closing a link releases it from the registry synchronously; no
    /// stale entry may remain visible to broadcast.
    pub fn on_link_closed(&mut self, link_id: &str) {
        let was_open = self
            .membership
            .get_mut(link_id)
            .map(|l| l.is_open())
            .unwrap_or(false);
        if self.membership.close(link_id).is_some() && was_open {
            let _ = self.event_tx.send(AppEvent::PeerLeft {
                room: self.room.as_str().to_string(),
                link_id: link_id.to_string(),
            });
            self.emit_status();
        }
    }

    /// Inbound bytes from one link, exactly as the remote sent them.
    pub fn on_frame(&mut self, link_id: &str, bytes: &[u8]) {
        if self.destroyed {
            debug!("dropping frame for destroyed session of room {}", self.room);
            return;
        }
        let Some(envelope) = protocol::decode(bytes) else {
            return;
        };
        match envelope {
            Envelope::Hello(greeting) => self.handle_hello(link_id, greeting),
            Envelope::Chat(chat) => self.handle_chat(chat),
            Envelope::Moderate(notice) => self.handle_moderate(notice),
            Envelope::RoomDestroy => self.teardown(),
            Envelope::Ignored => debug!("ignoring unknown envelope kind from {}", link_id),
        }
    }

    /// A local user's own outbound chat runs through the same policy as
    /// received messages.
    pub fn send_chat(&mut self, text: &str) -> SendOutcome {
        if self.destroyed {
            return SendOutcome::NotInRoom;
        }
        let now = now_ms();
        let me = self.participant_id.clone();
        if let Some(record) = self.engine.is_muted(&me) {
            return SendOutcome::Muted { remaining_ms: record.mute_until - now };
        }
        if self.engine.evaluate(&me, text) == Verdict::Violated {
            let record = self.punish(&me);
            let minutes = ((record.mute_until - now).max(0) + 59_999) / 60_000;
            self.append(ChatMessage::system(format!(
                "muted for breaking the rules ({} min)",
                minutes
            )));
            return SendOutcome::Violated { muted_for_ms: record.mute_until - now };
        }

        let message = ChatMessage {
            participant_id: me.clone(),
            display_name: self.display_name(),
            text: text.to_string(),
            timestamp: now,
            kind: MessageKind::Chat,
        };
        self.append(message.clone());
        self.membership.broadcast(&Envelope::Chat(ChatFrame {
            participant_id: message.participant_id,
            display_name: message.display_name,
            text: message.text,
            timestamp: message.timestamp,
        }));
        SendOutcome::Sent
    }

    /// Local teardown intent: tell the swarm, then apply it to ourselves.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.membership.broadcast(&Envelope::RoomDestroy);
        self.teardown();
    }

    /// Stop participating without tearing the room down for anyone else.
    pub fn leave(&mut self) {
        self.membership.close_all();
    }

    fn handle_hello(&mut self, link_id: &str, greeting: Greeting) {
        if greeting.participant_id == self.participant_id {
            return;
        }
        // A greeting can be the first thing we hear from a link.
        let newly_open = self.membership.open(link_id);
        let newly_bound =
            self.membership
                .bind_participant(link_id, &greeting.participant_id, &greeting.display_name);
        if newly_bound {
            let _ = self.event_tx.send(AppEvent::PeerJoined {
                room: self.room.as_str().to_string(),
                participant_id: greeting.participant_id,
                display_name: greeting.display_name,
            });
        }
        let reply = self.greeting();
        if let Some(link) = self.membership.get_mut(link_id) {
            if !link.greeted {
                link.greeted = true;
                link.send(&reply);
            }
        }
        if newly_open {
            self.emit_status();
        }
    }

    fn handle_chat(&mut self, chat: ChatFrame) {
        // Our own lines were appended at send time; the mesh may still echo
        // them back through another peer.
        if chat.participant_id == self.participant_id {
            return;
        }
        // A muted sender's messages vanish: not displayed, not re-broadcast.
        if self.engine.is_muted(&chat.participant_id).is_some() {
            return;
        }
        if self.engine.evaluate(&chat.participant_id, &chat.text) == Verdict::Violated {
            // The offending text is shown to no one; the verdict travels
            // instead.
            self.punish(&chat.participant_id);
            return;
        }
        self.append(ChatMessage {
            participant_id: chat.participant_id,
            display_name: chat.display_name,
            text: chat.text,
            timestamp: chat.timestamp,
            kind: MessageKind::Chat,
        });
    }

    fn handle_moderate(&mut self, notice: ModerationNotice) {
        self.engine.adopt_remote_verdict(&notice);
        self.append(ChatMessage::system(format!(
            "sanction applied to a participant: strike {}",
            notice.strike_count
        )));
        let _ = self.event_tx.send(AppEvent::ModerationApplied {
            room: self.room.as_str().to_string(),
            participant_id: notice.participant_id,
            strike_count: notice.strike_count,
            mute_until: notice.mute_until,
        });
    }

    /// Escalate-then-broadcast; atomic relative to remote verdicts because
    /// both run on the single event thread.
    fn punish(&mut self, offender: &str) -> ModerationRecord {
        let record = self.engine.escalate(offender);
        self.membership.broadcast(&Envelope::Moderate(ModerationNotice {
            participant_id: offender.to_string(),
            mute_until: record.mute_until,
            strike_count: record.strike_count,
        }));
        let _ = self.event_tx.send(AppEvent::ModerationApplied {
            room: self.room.as_str().to_string(),
            participant_id: offender.to_string(),
            strike_count: record.strike_count,
            mute_until: record.mute_until,
        });
        record
    }

    fn teardown(&mut self) {
        if let Err(e) = self.db.clear_chat_log(&self.room) {
            warn!("failed to clear chat log for room {}: {}", self.room, e);
        }
        if let Err(e) = self.db.remove_room(&self.room) {
            warn!("failed to forget room {}: {}", self.room, e);
        }
        self.membership.close_all();
        self.destroyed = true;
        let _ = self.event_tx.send(AppEvent::RoomDestroyed {
            room: self.room.as_str().to_string(),
        });
        self.emit_status();
    }

    fn greeting(&self) -> Envelope {
        Envelope::Hello(Greeting {
            participant_id: self.participant_id.clone(),
            display_name: self.display_name(),
            timestamp: now_ms(),
        })
    }

    fn display_name(&self) -> String {
        self.db.get_display_name().unwrap_or_else(|_| "Anonymous".to_string())
    }

    fn append(&mut self, message: ChatMessage) {
        if let Err(e) = self.db.append_message(&self.room, &message) {
            warn!("failed to append chat message for room {}: {}", self.room, e);
        }
        let _ = self.event_tx.send(AppEvent::MessageAppended {
            room: self.room.as_str().to_string(),
            message,
        });
    }

    fn emit_status(&self) {
        let status = if self.destroyed {
            RoomStatus::Destroyed
        } else {
            match self.membership.open_count() {
                0 => RoomStatus::Searching,
                peers => RoomStatus::Connected { peers },
            }
        };
        let _ = self.event_tx.send(AppEvent::StatusChanged {
            room: self.room.as_str().to_string(),
            status,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_db;
    use crate::events::create_event_bus;
    use crate::models::{Identity, SpamRules};

    const ME: &str = "me-0000-1111";
    const PEER: &str = "peer-2222-3333";

    fn strict_policy() -> RulesPolicy {
        RulesPolicy {
            banned_words: vec!["badword".into()],
            spam: SpamRules { max_messages_per10s: 9 },
            mute_durations_minutes: vec![5, 10, 20, 40],
        }
    }

    struct Harness {
        session: RoomSession,
        outbound_rx: mpsc::UnboundedReceiver<OutboundFrame>,
        events_rx: crate::events::EventReceiver,
        db: Arc<Database>,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        fn new(policy: RulesPolicy) -> Harness {
            let (db, dir) = temp_db();
            db.save_identity(&Identity {
                participant_id: ME.into(),
                display_name: "meiSLAND".into(),
            })
            .unwrap();
            let (event_tx, events_rx) = create_event_bus();
            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            let room = RoomId::parse("123456789").unwrap();
            let session = RoomSession::new(
                room,
                ME.into(),
                policy,
                db.clone(),
                event_tx,
                outbound_tx,
            );
            let mut h = Harness { session, outbound_rx, events_rx, db, _dir: dir };
            h.drain();
            h
        }

        fn drain(&mut self) {
            while self.outbound_rx.try_recv().is_ok() {}
            while self.events_rx.try_recv().is_ok() {}
        }

        fn outbound_envelopes(&mut self) -> Vec<(bool, Envelope)> {
            let mut frames = Vec::new();
            while let Ok(frame) = self.outbound_rx.try_recv() {
                let (room_wide, bytes) = match frame {
                    OutboundFrame::Room(bytes) => (true, bytes),
                    OutboundFrame::Link { bytes, .. } => (false, bytes),
                };
                frames.push((room_wide, protocol::decode(&bytes).unwrap()));
            }
            frames
        }

        fn events(&mut self) -> Vec<AppEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events_rx.try_recv() {
                events.push(event);
            }
            events
        }

        fn frame(&mut self, from: &str, envelope: &Envelope) {
            let bytes = protocol::encode(envelope).unwrap();
            self.session.on_frame(from, &bytes);
        }

        fn peer_hello(&mut self, link_id: &str) {
            self.frame(
                link_id,
                &Envelope::Hello(Greeting {
                    participant_id: PEER.into(),
                    display_name: "peeriSLAND".into(),
                    timestamp: now_ms(),
                }),
            );
        }

        fn peer_chat(&mut self, text: &str) {
            self.frame(
                "l1",
                &Envelope::Chat(ChatFrame {
                    participant_id: PEER.into(),
                    display_name: "peeriSLAND".into(),
                    text: text.into(),
                    timestamp: now_ms(),
                }),
            );
        }

        fn log(&self) -> Vec<ChatMessage> {
            self.db.load_chat_log(self.session.room()).unwrap()
        }
    }

    #[test]
    fn joining_appends_a_system_line() {
        let h = Harness::new(strict_policy());
        let log = h.log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].kind, MessageKind::System);
    }

    #[test]
    fn newly_open_link_gets_an_unsolicited_greeting() {
        let mut h = Harness::new(strict_policy());
        h.session.on_peer_subscribed("l1");
        h.session.on_peer_subscribed("l1");

        let frames = h.outbound_envelopes();
        let hellos: Vec<_> =
            frames.iter().filter(|(_, e)| matches!(e, Envelope::Hello(_))).collect();
        assert_eq!(hellos.len(), 1);
        assert!(!hellos[0].0, "greeting must be link-addressed");
    }

    #[test]
    fn hello_binds_participant_and_is_replied_to_once() {
        let mut h = Harness::new(strict_policy());
        h.session.on_peer_subscribed("l1");
        h.drain();

        h.peer_hello("l1");
        let frames = h.outbound_envelopes();
        assert_eq!(
            frames.iter().filter(|(_, e)| matches!(e, Envelope::Hello(_))).count(),
            1
        );
        assert!(h
            .events()
            .iter()
            .any(|e| matches!(e, AppEvent::PeerJoined { participant_id, .. } if participant_id == PEER)));

        // Duplicate greetings are harmless: no second reply, no second join.
        h.peer_hello("l1");
        assert!(h.outbound_envelopes().is_empty());
        assert!(h.events().iter().all(|e| !matches!(e, AppEvent::PeerJoined { .. })));
    }

    #[test]
    fn allowed_chat_is_appended_and_never_rebroadcast() {
        let mut h = Harness::new(strict_policy());
        h.peer_chat("hello everyone");

        assert!(h.outbound_envelopes().is_empty());
        let log = h.log();
        assert_eq!(log.last().unwrap().text, "hello everyone");
        assert!(h.events().iter().any(|e| matches!(e, AppEvent::MessageAppended { .. })));
    }

    #[test]
    fn own_echo_is_dropped() {
        let mut h = Harness::new(strict_policy());
        h.frame(
            "l1",
            &Envelope::Chat(ChatFrame {
                participant_id: ME.into(),
                display_name: "meiSLAND".into(),
                text: "echo of my own line".into(),
                timestamp: now_ms(),
            }),
        );
        assert_eq!(h.log().len(), 1);
        assert!(h.events().is_empty());
    }

    #[test]
    fn violating_chat_is_suppressed_and_verdict_broadcast() {
        let mut h = Harness::new(strict_policy());
        h.peer_chat("contains badword here");

        let frames = h.outbound_envelopes();
        assert_eq!(frames.len(), 1);
        let (room_wide, envelope) = &frames[0];
        assert!(room_wide);
        match envelope {
            Envelope::Moderate(notice) => {
                assert_eq!(notice.participant_id, PEER);
                assert_eq!(notice.strike_count, 1);
            }
            other => panic!("expected moderation notice, got {:?}", other),
        }
        // The offending text reached no log.
        assert!(h.log().iter().all(|m| !m.text.contains("badword")));

        // Later messages from the now-muted sender vanish silently.
        h.drain();
        h.peer_chat("perfectly polite");
        assert!(h.outbound_envelopes().is_empty());
        assert_eq!(h.log().len(), 1);
    }

    #[test]
    fn gossiped_verdict_is_adopted_with_a_system_notice() {
        let mut h = Harness::new(strict_policy());
        h.frame(
            "l1",
            &Envelope::Moderate(ModerationNotice {
                participant_id: PEER.into(),
                mute_until: now_ms() + 300_000,
                strike_count: 2,
            }),
        );

        assert!(h
            .events()
            .iter()
            .any(|e| matches!(e, AppEvent::ModerationApplied { strike_count: 2, .. })));
        assert_eq!(h.log().last().unwrap().kind, MessageKind::System);

        // The adopted mute silences the offender here too.
        h.drain();
        h.peer_chat("anything at all");
        assert_eq!(h.log().len(), 2);
    }

    #[test]
    fn own_chat_runs_the_same_policy() {
        let mut h = Harness::new(strict_policy());

        match h.session.send_chat("an innocent line") {
            SendOutcome::Sent => {}
            other => panic!("expected Sent, got {:?}", other),
        }
        let frames = h.outbound_envelopes();
        assert!(matches!(&frames[..], [(true, Envelope::Chat(_))]));

        match h.session.send_chat("a badword slips out") {
            SendOutcome::Violated { muted_for_ms } => assert!(muted_for_ms > 0),
            other => panic!("expected Violated, got {:?}", other),
        }
        let frames = h.outbound_envelopes();
        assert!(matches!(&frames[..], [(true, Envelope::Moderate(_))]));

        match h.session.send_chat("try again while muted") {
            SendOutcome::Muted { remaining_ms } => assert!(remaining_ms > 0),
            other => panic!("expected Muted, got {:?}", other),
        }
        // Neither blocked line reached the log.
        assert!(h.log().iter().all(|m| !m.text.contains("badword")));
        assert!(h.log().iter().all(|m| !m.text.contains("try again")));
    }

    #[test]
    fn teardown_clears_log_closes_links_and_is_terminal() {
        let mut h = Harness::new(strict_policy());
        h.session.on_peer_subscribed("l1");
        h.peer_chat("soon to vanish");
        h.drain();

        h.frame("l1", &Envelope::RoomDestroy);
        assert!(h.log().is_empty());
        assert!(h.session.is_destroyed());
        assert!(h.session.participants().is_empty());
        assert!(h.events().iter().any(|e| matches!(e, AppEvent::RoomDestroyed { .. })));

        // Terminal: nothing gets in or out afterwards.
        assert_eq!(h.session.send_chat("too late"), SendOutcome::NotInRoom);
        h.peer_chat("also too late");
        assert!(h.log().is_empty());
        assert!(h.outbound_envelopes().is_empty());
    }

    #[test]
    fn local_destroy_broadcasts_teardown_first() {
        let mut h = Harness::new(strict_policy());
        h.session.destroy();

        let frames = h.outbound_envelopes();
        assert!(matches!(&frames[..], [(true, Envelope::RoomDestroy)]));
        assert!(h.session.is_destroyed());
        assert!(h.log().is_empty());

        // Idempotent: destroying again broadcasts nothing.
        h.session.destroy();
        assert!(h.outbound_envelopes().is_empty());
    }

    #[test]
    fn permissive_policy_keeps_chat_flowing() {
        let mut h = Harness::new(RulesPolicy::default());
        for i in 0..50 {
            h.peer_chat(&format!("rapid fire {}", i));
        }
        // join line + 50 chat lines, nothing suppressed.
        assert_eq!(h.log().len(), 51);
        assert_eq!(h.session.send_chat("badword-laden line"), SendOutcome::Sent);
    }

    #[test]
    fn link_close_releases_membership_synchronously() {
        let mut h = Harness::new(strict_policy());
        h.session.on_peer_subscribed("l1");
        h.peer_hello("l1");
        h.drain();

        h.session.on_link_closed("l1");
        assert!(h.session.participants().is_empty());
        let events = h.events();
        assert!(events.iter().any(|e| matches!(e, AppEvent::PeerLeft { .. })));
        assert!(events.iter().any(|e| matches!(
            e,
            AppEvent::StatusChanged { status: RoomStatus::Searching, .. }
        )));
    }
}
