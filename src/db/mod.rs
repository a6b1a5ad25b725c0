pub mod chat;
pub mod moderation;
pub mod rooms;

use rusqlite::{Connection, Result};
use std::path::Path;
use std::sync::Mutex;

use crate::models::Identity;

/// Device-local durable storage: identity, the per-room chat log, known
/// rooms, and moderation records. Read-your-writes on this device only;
/// nothing here is shared with peers.
pub struct Database {
    pub conn: Mutex<Connection>,
}

impl Database {
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir).ok();
        let db_path = data_dir.join("island.db");
        let conn = Connection::open(db_path)?;
        let db = Database {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS identity (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                participant_id TEXT NOT NULL,
                display_name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS rooms (
                code TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chat_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                room_code TEXT NOT NULL,
                participant_id TEXT NOT NULL,
                display_name TEXT NOT NULL,
                text TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                kind TEXT NOT NULL DEFAULT 'chat'
            );

            -- Device-scoped, not room-scoped: a sanction follows the
            -- participant across every room on this device.
            CREATE TABLE IF NOT EXISTS moderation_records (
                participant_id TEXT PRIMARY KEY,
                strike_count INTEGER NOT NULL,
                mute_until INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chat_log_room ON chat_log(room_code, id);
            ",
        )?;
        Ok(())
    }

    // ============================================================
    // Identity
    // ============================================================

    pub fn load_identity(&self) -> Result<Option<Identity>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT participant_id, display_name FROM identity WHERE id = 1")?;
        let result = stmt.query_row([], |row| {
            Ok(Identity {
                participant_id: row.get(0)?,
                display_name: row.get(1)?,
            })
        });
        match result {
            Ok(identity) => Ok(Some(identity)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn save_identity(&self, identity: &Identity) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO identity (id, participant_id, display_name)
             VALUES (1, ?1, ?2)",
            rusqlite::params![identity.participant_id, identity.display_name],
        )?;
        Ok(())
    }

    pub fn get_display_name(&self) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT display_name FROM identity WHERE id = 1")?;
        let result = stmt.query_row([], |row| row.get::<_, String>(0));
        match result {
            Ok(name) => Ok(name),
            Err(_) => Ok("Anonymous".to_string()),
        }
    }

    pub fn set_display_name(&self, name: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("UPDATE identity SET display_name = ?1 WHERE id = 1", [name])?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Database;
    use std::sync::Arc;

    /// A Database on a throwaway directory; the TempDir must outlive the db.
    pub fn temp_db() -> (Arc<Database>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(Database::new(dir.path()).expect("open db"));
        (db, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::temp_db;
    use crate::models::Identity;

    #[test]
    fn identity_round_trips() {
        let (db, _dir) = temp_db();
        assert!(db.load_identity().unwrap().is_none());

        let identity = Identity {
            participant_id: "2b8a9c1d-aaaa-bbbb-cccc-123456789abc".into(),
            display_name: "56789abciSLAND".into(),
        };
        db.save_identity(&identity).unwrap();

        let loaded = db.load_identity().unwrap().unwrap();
        assert_eq!(loaded.participant_id, identity.participant_id);
        assert_eq!(loaded.display_name, identity.display_name);

        db.set_display_name("renamediSLAND").unwrap();
        assert_eq!(db.get_display_name().unwrap(), "renamediSLAND");
    }

    #[test]
    fn display_name_falls_back_before_identity_exists() {
        let (db, _dir) = temp_db();
        assert_eq!(db.get_display_name().unwrap(), "Anonymous");
    }
}
