use chrono::{DateTime, Utc};
use rusqlite::params;

use agora_shared::constants::MAX_HISTORY_PAGE_SIZE;
use agora_shared::protocol::{ChatPayload, ConversationPartition};
use agora_shared::Handle;

use crate::database::{format_ts, parse_handle, parse_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::{ChatMeta, Recipient};

impl Database {
    /// Append one chat line to the log.
    ///
    /// A private receiver that does not resolve to a user still gets a row:
    /// `receiver_id` stays NULL and the raw handle is kept in `meta_data`, so
    /// the send is auditable but never shows up in anyone's history.
    pub fn append_chat_message(
        &self,
        sender: &Handle,
        recipient: Recipient<'_>,
        content: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<i64> {
        let sender_id = self.user_id(sender)?;

        let (receiver_id, meta) = match recipient {
            Recipient::Everyone => (None, None),
            Recipient::User(receiver) => match self.user_id(receiver) {
                Ok(id) => (Some(id), None),
                Err(StoreError::NotFound) => {
                    tracing::debug!(receiver = %receiver, "chat receiver unknown, storing unresolved");
                    let meta = ChatMeta {
                        unresolved_receiver: Some(receiver.to_string()),
                    };
                    (None, Some(meta))
                }
                Err(other) => return Err(other),
            },
        };

        let meta_json = meta.map(|m| serde_json::to_string(&m)).transpose()?;

        self.conn().execute(
            "INSERT INTO chats (sender_id, receiver_id, message, sent_at, meta_data)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![sender_id, receiver_id, content, format_ts(&sent_at), meta_json],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// One page of the private conversation between `a` and `b`, oldest
    /// first. `offset` counts back from the newest message.
    pub fn query_message_history(
        &self,
        a: &Handle,
        b: &Handle,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<ChatPayload>> {
        let limit = limit.min(MAX_HISTORY_PAGE_SIZE);

        let mut stmt = self.conn().prepare(
            "SELECT s.nickname, r.nickname, c.message, c.sent_at, s.first_name, s.last_name
             FROM chats c
             JOIN users s ON c.sender_id = s.id
             JOIN users r ON c.receiver_id = r.id
             WHERE (s.nickname = ?1 AND r.nickname = ?2)
                OR (s.nickname = ?2 AND r.nickname = ?1)
             ORDER BY c.sent_at DESC, c.id DESC
             LIMIT ?3 OFFSET ?4",
        )?;

        let rows = stmt.query_map(params![a.as_str(), b.as_str(), limit, offset], |row| {
            let sent_at: String = row.get(3)?;
            Ok(ChatPayload {
                sender: parse_handle(row.get(0)?, 0)?,
                receiver: Some(parse_handle(row.get(1)?, 1)?),
                content: row.get(2)?,
                timestamp: parse_ts(&sent_at, 3)?,
                first_name: row.get(4)?,
                last_name: row.get(5)?,
            })
        })?;

        let mut page = Vec::new();
        for row in rows {
            page.push(row?);
        }
        page.reverse();
        Ok(page)
    }

    /// Split every other user into those who share at least one private
    /// message with `handle` and those who do not.
    pub fn query_conversation_partners(&self, handle: &Handle) -> Result<ConversationPartition> {
        let user_id = self.user_id(handle)?;

        let with_history = self.collect_handles(
            "SELECT DISTINCT u.nickname
             FROM users u
             JOIN chats c
               ON (c.sender_id = u.id AND c.receiver_id = ?1)
               OR (c.receiver_id = u.id AND c.sender_id = ?1)
             WHERE u.id != ?1
             ORDER BY u.nickname",
            user_id,
        )?;

        let without_history = self.collect_handles(
            "SELECT u.nickname
             FROM users u
             WHERE u.id != ?1 AND u.id NOT IN (
                 SELECT receiver_id FROM chats
                 WHERE sender_id = ?1 AND receiver_id IS NOT NULL
                 UNION
                 SELECT sender_id FROM chats WHERE receiver_id = ?1
             )
             ORDER BY u.nickname",
            user_id,
        )?;

        Ok(ConversationPartition {
            with_history,
            without_history,
        })
    }

    fn collect_handles(&self, sql: &str, user_id: i64) -> Result<Vec<Handle>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(params![user_id], |row| parse_handle(row.get(0)?, 0))?;

        let mut handles = Vec::new();
        for row in rows {
            handles.push(row?);
        }
        Ok(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_shared::Identity;

    fn handle(raw: &str) -> Handle {
        Handle::new(raw).unwrap()
    }

    fn setup(nicks: &[&str]) -> Database {
        let db = Database::open_in_memory().unwrap();
        for nick in nicks {
            db.create_user(&Identity::new(handle(nick), nick.to_uppercase(), "Test"))
                .unwrap();
        }
        db
    }

    #[test]
    fn history_is_oldest_first() {
        let db = setup(&["alice", "bob"]);
        let (a, b) = (handle("alice"), handle("bob"));
        let t0 = Utc::now();

        db.append_chat_message(&a, Recipient::User(&b), "first", t0).unwrap();
        db.append_chat_message(&b, Recipient::User(&a), "second", t0 + chrono::Duration::seconds(1))
            .unwrap();
        db.append_chat_message(&a, Recipient::User(&b), "hi", t0 + chrono::Duration::seconds(2))
            .unwrap();

        let page = db.query_message_history(&a, &b, 0, 10).unwrap();
        let contents: Vec<_> = page.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "hi"]);
        assert_eq!(page[1].sender, b);
        assert_eq!(page[1].first_name, "BOB");

        // Same conversation seen from the other side.
        assert_eq!(db.query_message_history(&b, &a, 0, 10).unwrap(), page);
    }

    #[test]
    fn history_pages_back_from_newest() {
        let db = setup(&["alice", "bob"]);
        let (a, b) = (handle("alice"), handle("bob"));
        let t0 = Utc::now();
        for i in 0..5 {
            db.append_chat_message(
                &a,
                Recipient::User(&b),
                &format!("m{i}"),
                t0 + chrono::Duration::seconds(i),
            )
            .unwrap();
        }

        let newest = db.query_message_history(&a, &b, 0, 2).unwrap();
        let older = db.query_message_history(&a, &b, 2, 2).unwrap();
        assert_eq!(newest.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(), vec!["m3", "m4"]);
        assert_eq!(older.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(), vec!["m1", "m2"]);
    }

    #[test]
    fn broadcasts_are_logged_but_not_history() {
        let db = setup(&["alice", "bob"]);
        let (a, b) = (handle("alice"), handle("bob"));

        db.append_chat_message(&a, Recipient::Everyone, "hello all", Utc::now()).unwrap();

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM chats WHERE receiver_id IS NULL", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        assert!(db.query_message_history(&a, &b, 0, 10).unwrap().is_empty());

        let partition = db.query_conversation_partners(&a).unwrap();
        assert!(partition.with_history.is_empty());
        assert_eq!(partition.without_history, vec![b]);
    }

    #[test]
    fn unresolved_receiver_is_kept_in_meta() {
        let db = setup(&["alice"]);
        let a = handle("alice");

        db.append_chat_message(&a, Recipient::User(&handle("ghost")), "anyone?", Utc::now())
            .unwrap();

        let meta: String = db
            .conn()
            .query_row("SELECT meta_data FROM chats", [], |row| row.get(0))
            .unwrap();
        let meta: ChatMeta = serde_json::from_str(&meta).unwrap();
        assert_eq!(meta.unresolved_receiver.as_deref(), Some("ghost"));
    }

    #[test]
    fn conversation_partition() {
        let db = setup(&["alice", "bob", "carol", "dave"]);
        let a = handle("alice");

        db.append_chat_message(&a, Recipient::User(&handle("bob")), "hi", Utc::now()).unwrap();
        db.append_chat_message(&handle("carol"), Recipient::User(&a), "yo", Utc::now())
            .unwrap();

        let partition = db.query_conversation_partners(&a).unwrap();
        assert_eq!(partition.with_history, vec![handle("bob"), handle("carol")]);
        assert_eq!(partition.without_history, vec![handle("dave")]);
    }
}
