//! The per-(recipient, sender) notification ledger.

use tracing::warn;

use agora_shared::protocol::ServerEvent;
use agora_shared::Handle;
use agora_store::NotificationRecord;

use crate::error::HubError;
use crate::persistence::Persistence;

#[derive(Clone)]
pub struct NotificationService {
    store: Persistence,
}

impl NotificationService {
    pub(crate) fn new(store: Persistence) -> Self {
        Self { store }
    }

    /// Unread notifications for `recipient`, newest first. A store failure
    /// yields an empty list so a connect never fails on it.
    pub async fn pending_for(&self, recipient: &Handle) -> Vec<NotificationRecord> {
        match self.unread_for(recipient).await {
            Ok(records) => records,
            Err(e) => {
                warn!(handle = %recipient, error = %e, "Failed to load pending notifications");
                Vec::new()
            }
        }
    }

    /// Pending notifications as the frames flushed to a fresh connection.
    pub async fn pending_events(&self, recipient: &Handle) -> Vec<ServerEvent> {
        self.pending_for(recipient)
            .await
            .into_iter()
            .map(|record| ServerEvent::Notification {
                sender: record.sender,
                id: Some(record.id),
            })
            .collect()
    }

    pub async fn unread_for(&self, recipient: &Handle) -> Result<Vec<NotificationRecord>, HubError> {
        let recipient = recipient.clone();
        self.store
            .call(move |gw| gw.query_unread_notifications(&recipient))
            .await
    }

    /// Delete every notification of the pair. Used when the recipient opens
    /// the conversation.
    pub async fn clear(&self, recipient: &Handle, sender: &Handle) -> Result<usize, HubError> {
        let (recipient, sender) = (recipient.clone(), sender.clone());
        self.store
            .call(move |gw| gw.delete_notifications(&recipient, &sender))
            .await
    }

    /// A private message could not be delivered live.
    pub(crate) async fn record_undelivered(
        &self,
        recipient: &Handle,
        sender: &Handle,
    ) -> Result<i64, HubError> {
        let (recipient, sender) = (recipient.clone(), sender.clone());
        self.store
            .call(move |gw| gw.create_notification(&recipient, &sender))
            .await
    }

    /// A private message reached the recipient live; settle anything still
    /// unread from the same sender.
    pub(crate) async fn mark_delivered(
        &self,
        recipient: &Handle,
        sender: &Handle,
    ) -> Result<usize, HubError> {
        let (recipient, sender) = (recipient.clone(), sender.clone());
        self.store
            .call(move |gw| gw.mark_notification_read(&recipient, &sender))
            .await
    }
}

#[cfg(test)]
mod tests {
    use agora_shared::protocol::ServerEvent;

    use crate::test_support::{handle, hub_with_users};

    #[tokio::test]
    async fn test_pending_newest_first_as_events() {
        let (hub, _gateway) = hub_with_users(&["alice", "bob", "carol"]);
        let service = hub.notifications();
        let bob = handle("bob");

        service.record_undelivered(&bob, &handle("alice")).await.unwrap();
        service.record_undelivered(&bob, &handle("carol")).await.unwrap();

        let events = service.pending_events(&bob).await;
        let senders: Vec<_> = events
            .iter()
            .map(|e| match e {
                ServerEvent::Notification { sender, id } => {
                    assert!(id.is_some());
                    sender.as_str().to_string()
                }
                other => panic!("unexpected event: {other:?}"),
            })
            .collect();
        assert_eq!(senders, vec!["carol", "alice"]);
    }

    #[tokio::test]
    async fn test_mark_delivered_hides_pending() {
        let (hub, _gateway) = hub_with_users(&["alice", "bob"]);
        let service = hub.notifications();
        let (alice, bob) = (handle("alice"), handle("bob"));

        service.record_undelivered(&bob, &alice).await.unwrap();
        assert_eq!(service.mark_delivered(&bob, &alice).await.unwrap(), 1);
        assert!(service.pending_for(&bob).await.is_empty());
        assert!(service.unread_for(&bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_deletes_pair() {
        let (hub, _gateway) = hub_with_users(&["alice", "bob"]);
        let service = hub.notifications();
        let (alice, bob) = (handle("alice"), handle("bob"));

        service.record_undelivered(&bob, &alice).await.unwrap();
        service.record_undelivered(&bob, &alice).await.unwrap();
        assert_eq!(service.clear(&bob, &alice).await.unwrap(), 2);
        assert_eq!(service.clear(&bob, &alice).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_recipient_yields_empty_pending() {
        let (hub, _gateway) = hub_with_users(&["alice"]);
        assert!(hub.notifications().pending_for(&handle("ghost")).await.is_empty());
    }
}
