use super::Database;
use crate::models::ModerationRecord;

impl Database {
    pub fn get_moderation_record(
        &self,
        participant_id: &str,
    ) -> rusqlite::Result<Option<ModerationRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT strike_count, mute_until FROM moderation_records WHERE participant_id = ?1",
        )?;
        let result = stmt.query_row([participant_id], |row| {
            Ok(ModerationRecord {
                strike_count: row.get(0)?,
                mute_until: row.get(1)?,
            })
        });
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn put_moderation_record(
        &self,
        participant_id: &str,
        record: &ModerationRecord,
    ) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO moderation_records (participant_id, strike_count, mute_until)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![participant_id, record.strike_count, record.mute_until],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::temp_db;
    use crate::models::ModerationRecord;

    #[test]
    fn records_overwrite_by_participant() {
        let (db, _dir) = temp_db();
        assert!(db.get_moderation_record("u-1").unwrap().is_none());

        db.put_moderation_record("u-1", &ModerationRecord { strike_count: 1, mute_until: 100 })
            .unwrap();
        db.put_moderation_record("u-1", &ModerationRecord { strike_count: 2, mute_until: 900 })
            .unwrap();

        let rec = db.get_moderation_record("u-1").unwrap().unwrap();
        assert_eq!(rec.strike_count, 2);
        assert_eq!(rec.mute_until, 900);
        assert!(db.get_moderation_record("u-2").unwrap().is_none());
    }
}
