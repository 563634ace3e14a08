use chrono::Utc;
use rusqlite::params;

use agora_shared::Handle;

use crate::database::{format_ts, parse_handle, parse_ts, Database};
use crate::error::Result;
use crate::models::NotificationRecord;

impl Database {
    pub fn create_notification(&self, recipient: &Handle, sender: &Handle) -> Result<i64> {
        let recipient_id = self.user_id(recipient)?;
        let sender_id = self.user_id(sender)?;

        self.conn().execute(
            "INSERT INTO notifications (user_id, sender_id, is_read, created_at)
             VALUES (?1, ?2, 0, ?3)",
            params![recipient_id, sender_id, format_ts(&Utc::now())],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// Unread notifications addressed to `recipient`, newest first.
    pub fn query_unread_notifications(&self, recipient: &Handle) -> Result<Vec<NotificationRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT n.id, s.nickname, n.created_at
             FROM notifications n
             JOIN users s ON n.sender_id = s.id
             JOIN users r ON n.user_id = r.id
             WHERE r.nickname = ?1 AND n.is_read = 0
             ORDER BY n.created_at DESC, n.id DESC",
        )?;

        let rows = stmt.query_map(params![recipient.as_str()], |row| {
            let created_at: String = row.get(2)?;
            Ok(NotificationRecord {
                id: row.get(0)?,
                sender: parse_handle(row.get(1)?, 1)?,
                created_at: parse_ts(&created_at, 2)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Mark every unread notification from `sender` to `recipient` as read.
    /// Read rows are kept for audit. Returns the number of rows changed.
    pub fn mark_notification_read(&self, recipient: &Handle, sender: &Handle) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE notifications SET is_read = 1
             WHERE is_read = 0
               AND user_id = (SELECT id FROM users WHERE nickname = ?1)
               AND sender_id = (SELECT id FROM users WHERE nickname = ?2)",
            params![recipient.as_str(), sender.as_str()],
        )?;
        Ok(affected)
    }

    /// Delete every notification, read or not, from `sender` to `recipient`.
    pub fn delete_notifications(&self, recipient: &Handle, sender: &Handle) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM notifications
             WHERE user_id = (SELECT id FROM users WHERE nickname = ?1)
               AND sender_id = (SELECT id FROM users WHERE nickname = ?2)",
            params![recipient.as_str(), sender.as_str()],
        )?;
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_shared::Identity;

    fn handle(raw: &str) -> Handle {
        Handle::new(raw).unwrap()
    }

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        for nick in ["alice", "bob", "carol"] {
            db.create_user(&Identity::new(handle(nick), nick, "Test")).unwrap();
        }
        db
    }

    #[test]
    fn unread_newest_first() {
        let db = setup();
        let bob = handle("bob");

        let first = db.create_notification(&bob, &handle("alice")).unwrap();
        let second = db.create_notification(&bob, &handle("carol")).unwrap();

        let unread = db.query_unread_notifications(&bob).unwrap();
        assert_eq!(unread.iter().map(|n| n.id).collect::<Vec<_>>(), vec![second, first]);
        assert_eq!(unread[0].sender, handle("carol"));
    }

    #[test]
    fn mark_read_hides_but_keeps_rows() {
        let db = setup();
        let (alice, bob) = (handle("alice"), handle("bob"));

        db.create_notification(&bob, &alice).unwrap();
        db.create_notification(&bob, &alice).unwrap();
        db.create_notification(&bob, &handle("carol")).unwrap();

        assert_eq!(db.mark_notification_read(&bob, &alice).unwrap(), 2);
        // Second call finds nothing left to mark.
        assert_eq!(db.mark_notification_read(&bob, &alice).unwrap(), 0);

        let unread = db.query_unread_notifications(&bob).unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].sender, handle("carol"));

        let total: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM notifications", [], |row| row.get(0))
            .unwrap();
        assert_eq!(total, 3);
    }

    #[test]
    fn delete_removes_pair_only() {
        let db = setup();
        let (alice, bob) = (handle("alice"), handle("bob"));

        db.create_notification(&bob, &alice).unwrap();
        db.create_notification(&alice, &bob).unwrap();

        assert_eq!(db.delete_notifications(&bob, &alice).unwrap(), 1);
        assert!(db.query_unread_notifications(&bob).unwrap().is_empty());
        assert_eq!(db.query_unread_notifications(&alice).unwrap().len(), 1);
    }

    #[test]
    fn unknown_pair_is_a_no_op() {
        let db = setup();
        assert_eq!(db.delete_notifications(&handle("ghost"), &handle("alice")).unwrap(), 0);
        assert!(db.create_notification(&handle("ghost"), &handle("alice")).is_err());
    }
}
