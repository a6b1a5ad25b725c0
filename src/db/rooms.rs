use super::Database;
use crate::models::{Room, RoomId};

impl Database {
    pub fn upsert_room(&self, room: &Room) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO rooms (code, title, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![room.code.as_str(), room.title, room.created_at],
        )?;
        Ok(())
    }

    pub fn list_rooms(&self) -> rusqlite::Result<Vec<Room>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT code, title, created_at FROM rooms ORDER BY created_at DESC")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        // Codes in the table were validated on the way in; skip any that
        // fail to parse rather than failing the whole listing.
        Ok(rows
            .into_iter()
            .filter_map(|(code, title, created_at)| {
                RoomId::parse(&code).ok().map(|code| Room { code, title, created_at })
            })
            .collect())
    }

    pub fn remove_room(&self, room: &RoomId) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM rooms WHERE code = ?1", [room.as_str()])?;
        Ok(())
    }
}
