use super::Database;
use crate::models::{ChatMessage, MessageKind, RoomId};

impl Database {
    pub fn append_message(&self, room: &RoomId, msg: &ChatMessage) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO chat_log (room_code, participant_id, display_name, text, timestamp, kind)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                room.as_str(),
                msg.participant_id,
                msg.display_name,
                msg.text,
                msg.timestamp,
                msg.kind.as_str(),
            ],
        )?;
        Ok(())
    }

    /// The room's log in local arrival order.
    pub fn load_chat_log(&self, room: &RoomId) -> rusqlite::Result<Vec<ChatMessage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT participant_id, display_name, text, timestamp, kind
             FROM chat_log WHERE room_code = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([room.as_str()], |row| {
                Ok(ChatMessage {
                    participant_id: row.get(0)?,
                    display_name: row.get(1)?,
                    text: row.get(2)?,
                    timestamp: row.get(3)?,
                    kind: MessageKind::from_str(&row.get::<_, String>(4)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn clear_chat_log(&self, room: &RoomId) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM chat_log WHERE room_code = ?1", [room.as_str()])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::temp_db;
    use crate::models::{ChatMessage, MessageKind, RoomId};

    fn msg(text: &str) -> ChatMessage {
        ChatMessage {
            participant_id: "u-1".into(),
            display_name: "niSLAND".into(),
            text: text.into(),
            timestamp: 1_700_000_000_000,
            kind: MessageKind::Chat,
        }
    }

    #[test]
    fn chat_log_appends_in_arrival_order() {
        let (db, _dir) = temp_db();
        let room = RoomId::parse("123456789").unwrap();

        db.append_message(&room, &msg("first")).unwrap();
        db.append_message(&room, &ChatMessage::system("joined the island")).unwrap();
        db.append_message(&room, &msg("second")).unwrap();

        let log = db.load_chat_log(&room).unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].text, "first");
        assert_eq!(log[1].kind, MessageKind::System);
        assert_eq!(log[2].text, "second");
    }

    #[test]
    fn clear_only_affects_the_named_room() {
        let (db, _dir) = temp_db();
        let a = RoomId::parse("111111111").unwrap();
        let b = RoomId::parse("222222222").unwrap();

        db.append_message(&a, &msg("in a")).unwrap();
        db.append_message(&b, &msg("in b")).unwrap();
        db.clear_chat_log(&a).unwrap();

        assert!(db.load_chat_log(&a).unwrap().is_empty());
        assert_eq!(db.load_chat_log(&b).unwrap().len(), 1);
    }
}
