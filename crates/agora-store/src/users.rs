use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use agora_shared::{Handle, Identity};

use crate::database::{format_ts, parse_handle, parse_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::DirectoryEntry;

impl Database {
    /// Insert a user row. Called by the registration flow; the hub itself
    /// only reads users.
    pub fn create_user(&self, identity: &Identity) -> Result<i64> {
        self.conn().execute(
            "INSERT INTO users (nickname, first_name, last_name, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                identity.handle.as_str(),
                identity.first_name,
                identity.last_name,
                format_ts(&Utc::now()),
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    pub fn find_identity(&self, handle: &Handle) -> Result<Identity> {
        self.conn()
            .query_row(
                "SELECT nickname, first_name, last_name FROM users WHERE nickname = ?1",
                params![handle.as_str()],
                |row| {
                    Ok(Identity {
                        handle: parse_handle(row.get(0)?, 0)?,
                        first_name: row.get(1)?,
                        last_name: row.get(2)?,
                    })
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub(crate) fn user_id(&self, handle: &Handle) -> Result<i64> {
        self.conn()
            .query_row(
                "SELECT id FROM users WHERE nickname = ?1",
                params![handle.as_str()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StoreError::NotFound)
    }

    /// Every user except `excluding`, online users first, then by name.
    pub fn list_directory(&self, excluding: &Handle) -> Result<Vec<DirectoryEntry>> {
        let mut stmt = self.conn().prepare(
            "SELECT u.nickname, u.first_name, u.last_name,
                    COALESCE(s.is_online, 0), s.last_seen
             FROM users u
             LEFT JOIN user_status s ON s.user_id = u.id
             WHERE u.nickname != ?1
             ORDER BY COALESCE(s.is_online, 0) DESC, u.first_name, u.last_name",
        )?;

        let rows = stmt.query_map(params![excluding.as_str()], |row| {
            let last_seen: Option<String> = row.get(4)?;
            Ok(DirectoryEntry {
                identity: Identity {
                    handle: parse_handle(row.get(0)?, 0)?,
                    first_name: row.get(1)?,
                    last_name: row.get(2)?,
                },
                is_online: row.get::<_, i64>(3)? != 0,
                last_seen: last_seen.map(|raw| parse_ts(&raw, 4)).transpose()?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(nick: &str, first: &str) -> Identity {
        Identity::new(Handle::new(nick).unwrap(), first, "Test")
    }

    #[test]
    fn create_and_find_user() {
        let db = Database::open_in_memory().unwrap();
        db.create_user(&identity("alice", "Alice")).unwrap();

        let found = db.find_identity(&Handle::new("alice").unwrap()).unwrap();
        assert_eq!(found.first_name, "Alice");
    }

    #[test]
    fn unknown_user_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = db.find_identity(&Handle::new("ghost").unwrap()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn duplicate_nickname_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.create_user(&identity("alice", "Alice")).unwrap();
        assert!(db.create_user(&identity("alice", "Other")).is_err());
    }

    #[test]
    fn directory_lists_online_first_and_excludes_caller() {
        let db = Database::open_in_memory().unwrap();
        db.create_user(&identity("alice", "Alice")).unwrap();
        db.create_user(&identity("bob", "Bob")).unwrap();
        db.create_user(&identity("carol", "Carol")).unwrap();
        db.upsert_presence(&Handle::new("carol").unwrap(), true).unwrap();

        let entries = db.list_directory(&Handle::new("alice").unwrap()).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.identity.handle.as_str()).collect();
        assert_eq!(names, vec!["carol", "bob"]);
        assert!(entries[0].is_online);
        assert!(entries[0].last_seen.is_some());
        assert!(!entries[1].is_online);
        assert!(entries[1].last_seen.is_none());
    }
}
