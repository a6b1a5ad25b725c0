//! Per-participant moderation: spam-rate limiting, banned-word filtering,
//! escalating mutes, and adoption of verdicts gossiped by peers.
//!
//! Every node runs this engine over every chat message it sees and decides
//! independently; there is no authority node. Verdicts heard from peers
//! overwrite local state unconditionally, last-applied-wins: a deliberate
//! trade-off of the leaderless design, accepted along with the
//! false-accusation vector it opens. Nodes may transiently disagree on
//! strike counts when their spam windows race; that divergence is inherent
//! and not reconciled.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::db::Database;
use crate::models::{now_ms, ModerationRecord, RulesPolicy, SpamWindow};
use crate::protocol::ModerationNotice;

/// Fixed spam-counting window.
pub const SPAM_WINDOW_MS: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Violated,
}

/// One engine instance per room session. Moderation records are
/// device-scoped and write through to the database so they survive session
/// restarts; spam windows are transient.
pub struct ModerationEngine {
    policy: RulesPolicy,
    db: Arc<Database>,
    records: HashMap<String, ModerationRecord>,
    spam: HashMap<String, SpamWindow>,
}

impl ModerationEngine {
    pub fn new(policy: RulesPolicy, db: Arc<Database>) -> ModerationEngine {
        ModerationEngine {
            policy,
            db,
            records: HashMap::new(),
            spam: HashMap::new(),
        }
    }

    pub fn evaluate(&mut self, participant_id: &str, text: &str) -> Verdict {
        self.evaluate_at(participant_id, text, now_ms())
    }

    /// A message is `Violated` if it matches a banned word, or otherwise if
    /// this sender's count within the 10 s window (incremented for this
    /// message) exceeds the policy limit. A banned-word hit short-circuits
    /// and does not consume spam-window budget.
    pub fn evaluate_at(&mut self, participant_id: &str, text: &str, now: i64) -> Verdict {
        if self.matches_banned_word(text) {
            return Verdict::Violated;
        }
        if self.spam_window_exceeded(participant_id, now) {
            return Verdict::Violated;
        }
        Verdict::Allowed
    }

    pub fn escalate(&mut self, participant_id: &str) -> ModerationRecord {
        self.escalate_at(participant_id, now_ms())
    }

    /// Add a strike and extend the mute. Strikes cap at the number of
    /// configured durations; the mute deadline never moves backwards under
    /// local escalation. Under the permissive default (no durations) this
    /// is a no-op that returns the stored record.
    pub fn escalate_at(&mut self, participant_id: &str, now: i64) -> ModerationRecord {
        let mut record = self.record(participant_id);
        let durations = &self.policy.mute_durations_minutes;
        if durations.is_empty() {
            return record;
        }
        record.strike_count = (record.strike_count + 1).min(durations.len() as u32);
        let minutes = durations[record.strike_count as usize - 1];
        record.mute_until = now + (minutes as i64) * 60_000;
        self.store(participant_id, record.clone());
        record
    }

    pub fn is_muted(&mut self, participant_id: &str) -> Option<ModerationRecord> {
        self.is_muted_at(participant_id, now_ms())
    }

    /// Muted at any instant `now <= mute_until`; the record comes back so
    /// callers can report the remaining time.
    pub fn is_muted_at(&mut self, participant_id: &str, now: i64) -> Option<ModerationRecord> {
        let record = self.record(participant_id);
        if now > record.mute_until || record.strike_count == 0 {
            None
        } else {
            Some(record)
        }
    }

    /// Trust-the-sender gossip rule: overwrite our record for the named
    /// offender with whatever the notice says. No quorum, no signature;
    /// applied even when the offender is us and even when it lowers the
    /// local strike count.
    pub fn adopt_remote_verdict(&mut self, notice: &ModerationNotice) {
        let record = ModerationRecord {
            strike_count: notice.strike_count,
            mute_until: notice.mute_until,
        };
        self.store(&notice.participant_id, record);
    }

    fn matches_banned_word(&self, text: &str) -> bool {
        if self.policy.banned_words.is_empty() {
            return false;
        }
        let lowered = text.to_lowercase();
        self.policy
            .banned_words
            .iter()
            .any(|w| !w.is_empty() && lowered.contains(&w.to_lowercase()))
    }

    fn spam_window_exceeded(&mut self, participant_id: &str, now: i64) -> bool {
        let limit = self.policy.spam.max_messages_per10s;
        let window = self
            .spam
            .entry(participant_id.to_string())
            .or_insert(SpamWindow { count: 0, window_start: now });
        if now - window.window_start > SPAM_WINDOW_MS {
            window.count = 0;
            window.window_start = now;
        }
        window.count += 1;
        window.count > limit
    }

    fn record(&mut self, participant_id: &str) -> ModerationRecord {
        if let Some(record) = self.records.get(participant_id) {
            return record.clone();
        }
        match self.db.get_moderation_record(participant_id) {
            Ok(Some(record)) => {
                self.records.insert(participant_id.to_string(), record.clone());
                record
            }
            Ok(None) => ModerationRecord::default(),
            Err(e) => {
                warn!("failed to load moderation record for {}: {}", participant_id, e);
                ModerationRecord::default()
            }
        }
    }

    fn store(&mut self, participant_id: &str, record: ModerationRecord) {
        if let Err(e) = self.db.put_moderation_record(participant_id, &record) {
            warn!("failed to persist moderation record for {}: {}", participant_id, e);
        }
        self.records.insert(participant_id.to_string(), record);
    }
}
