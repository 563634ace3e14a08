use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use agora_shared::Handle;

use crate::database::{format_ts, parse_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::PresenceRecord;

impl Database {
    /// Record a connect or disconnect. The row is created on the user's first
    /// connect and updated in place afterwards; it is never deleted.
    pub fn upsert_presence(&self, handle: &Handle, is_online: bool) -> Result<()> {
        let user_id = self.user_id(handle)?;
        self.conn().execute(
            "INSERT INTO user_status (user_id, is_online, last_seen)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                 is_online = excluded.is_online,
                 last_seen = excluded.last_seen",
            params![user_id, is_online as i32, format_ts(&Utc::now())],
        )?;
        Ok(())
    }

    pub fn get_presence(&self, handle: &Handle) -> Result<Option<PresenceRecord>> {
        let row: Option<(i64, String)> = self
            .conn()
            .query_row(
                "SELECT s.is_online, s.last_seen
                 FROM user_status s
                 JOIN users u ON u.id = s.user_id
                 WHERE u.nickname = ?1",
                params![handle.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(StoreError::Sqlite)?;

        row.map(|(is_online, last_seen)| {
            Ok(PresenceRecord {
                handle: handle.clone(),
                is_online: is_online != 0,
                last_seen: parse_ts(&last_seen, 1)?,
            })
        })
        .transpose()
    }
}
