//! The persistence operations the chat hub depends on.
//!
//! The trait is synchronous: SQLite calls block, so the hub runs them on
//! tokio's blocking pool and never while holding one of its own locks.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use agora_shared::protocol::{ChatPayload, ConversationPartition};
use agora_shared::{Handle, Identity};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{DirectoryEntry, NotificationRecord, PresenceRecord, Recipient};

pub trait PersistenceGateway: Send + Sync + 'static {
    /// `StoreError::NotFound` when no user has this handle.
    fn find_identity_by_handle(&self, handle: &Handle) -> Result<Identity>;

    /// Sets `last_seen` to now as a side effect.
    fn upsert_presence(&self, handle: &Handle, is_online: bool) -> Result<()>;

    fn presence_of(&self, handle: &Handle) -> Result<Option<PresenceRecord>>;

    fn append_chat_message(
        &self,
        sender: &Handle,
        receiver: Option<&Handle>,
        content: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<i64>;

    fn query_conversation_partners(&self, handle: &Handle) -> Result<ConversationPartition>;

    fn create_notification(&self, recipient: &Handle, sender: &Handle) -> Result<i64>;

    /// Newest first.
    fn query_unread_notifications(&self, recipient: &Handle) -> Result<Vec<NotificationRecord>>;

    fn mark_notification_read(&self, recipient: &Handle, sender: &Handle) -> Result<usize>;

    fn delete_notifications(&self, recipient: &Handle, sender: &Handle) -> Result<usize>;

    /// Oldest first within the page.
    fn query_message_history(
        &self,
        a: &Handle,
        b: &Handle,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<ChatPayload>>;

    fn list_directory(&self, excluding: &Handle) -> Result<Vec<DirectoryEntry>>;
}

/// [`PersistenceGateway`] over a single SQLite connection.
pub struct SqliteGateway {
    db: Mutex<Database>,
}

impl SqliteGateway {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open_at(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Direct access for callers that own the user table (registration,
    /// tests).
    pub fn db(&self) -> Result<MutexGuard<'_, Database>> {
        self.db.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl PersistenceGateway for SqliteGateway {
    fn find_identity_by_handle(&self, handle: &Handle) -> Result<Identity> {
        self.db()?.find_identity(handle)
    }

    fn upsert_presence(&self, handle: &Handle, is_online: bool) -> Result<()> {
        self.db()?.upsert_presence(handle, is_online)
    }

    fn presence_of(&self, handle: &Handle) -> Result<Option<PresenceRecord>> {
        self.db()?.get_presence(handle)
    }

    fn append_chat_message(
        &self,
        sender: &Handle,
        receiver: Option<&Handle>,
        content: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<i64> {
        let recipient = match receiver {
            Some(handle) => Recipient::User(handle),
            None => Recipient::Everyone,
        };
        self.db()?.append_chat_message(sender, recipient, content, sent_at)
    }

    fn query_conversation_partners(&self, handle: &Handle) -> Result<ConversationPartition> {
        self.db()?.query_conversation_partners(handle)
    }

    fn create_notification(&self, recipient: &Handle, sender: &Handle) -> Result<i64> {
        self.db()?.create_notification(recipient, sender)
    }

    fn query_unread_notifications(&self, recipient: &Handle) -> Result<Vec<NotificationRecord>> {
        self.db()?.query_unread_notifications(recipient)
    }

    fn mark_notification_read(&self, recipient: &Handle, sender: &Handle) -> Result<usize> {
        self.db()?.mark_notification_read(recipient, sender)
    }

    fn delete_notifications(&self, recipient: &Handle, sender: &Handle) -> Result<usize> {
        self.db()?.delete_notifications(recipient, sender)
    }

    fn query_message_history(
        &self,
        a: &Handle,
        b: &Handle,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<ChatPayload>> {
        self.db()?.query_message_history(a, b, offset, limit)
    }

    fn list_directory(&self, excluding: &Handle) -> Result<Vec<DirectoryEntry>> {
        self.db()?.list_directory(excluding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_round_trip_through_trait_object() {
        let gateway = SqliteGateway::open_in_memory().unwrap();
        let (a, b) = (Handle::new("alice").unwrap(), Handle::new("bob").unwrap());
        {
            let db = gateway.db().unwrap();
            db.create_user(&Identity::new(a.clone(), "Alice", "L")).unwrap();
            db.create_user(&Identity::new(b.clone(), "Bob", "M")).unwrap();
        }

        let gateway: &dyn PersistenceGateway = &gateway;
        gateway.append_chat_message(&a, Some(&b), "hi", Utc::now()).unwrap();

        let page = gateway.query_message_history(&a, &b, 0, 10).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].content, "hi");
        assert_eq!(page[0].receiver.as_ref(), Some(&b));
    }
}
