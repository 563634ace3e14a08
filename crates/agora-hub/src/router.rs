//! Classifies inbound chat units and delivers them.
//!
//! Every unit is persisted first, whatever happens to delivery. A unit with
//! no receiver goes to every live connection, the sender's included. A
//! private unit goes to every connection of the receiver; if none of them
//! takes it, a notification is stored for the receiver's next connect.

use chrono::Utc;
use tracing::{debug, info, warn};

use agora_shared::protocol::{ChatPayload, ClientMessage, ServerEvent};
use agora_shared::{Handle, Identity};

use crate::notifications::NotificationService;
use crate::persistence::Persistence;
use crate::registry::ConnectionRegistry;

/// What `route` did with a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Empty content, nothing stored or sent.
    Ignored,
    Broadcast { delivered: usize },
    /// Reached at least one of the receiver's connections.
    Delivered { receiver: Handle, connections: usize },
    /// Receiver offline or unreachable; a notification was stored if the
    /// receiver exists.
    Deferred { receiver: Handle },
}

#[derive(Clone)]
pub struct MessageRouter {
    registry: ConnectionRegistry,
    store: Persistence,
    notifications: NotificationService,
}

impl MessageRouter {
    pub(crate) fn new(
        registry: ConnectionRegistry,
        store: Persistence,
        notifications: NotificationService,
    ) -> Self {
        Self {
            registry,
            store,
            notifications,
        }
    }

    /// Route one unit sent by the authenticated `sender`.
    pub async fn route(&self, sender: &Identity, message: ClientMessage) -> RouteOutcome {
        if message.content.trim().is_empty() {
            debug!(handle = %sender.handle, "Ignoring empty chat unit");
            return RouteOutcome::Ignored;
        }

        if !message.sender.is_empty() && message.sender != sender.handle.as_str() {
            warn!(
                handle = %sender.handle,
                claimed = %message.sender,
                "Inbound sender does not match connection identity, using connection identity"
            );
        }

        let receiver = message.receiver_handle();
        let payload = ChatPayload {
            sender: sender.handle.clone(),
            receiver: receiver.clone(),
            content: message.content,
            timestamp: Utc::now(),
            first_name: sender.first_name.clone(),
            last_name: sender.last_name.clone(),
        };

        self.persist(&payload).await;

        match receiver {
            None => self.broadcast(payload).await,
            Some(receiver) => self.deliver_private(receiver, payload).await,
        }
    }

    async fn persist(&self, payload: &ChatPayload) {
        let row = payload.clone();
        let result = self
            .store
            .call(move |gw| {
                gw.append_chat_message(&row.sender, row.receiver.as_ref(), &row.content, row.timestamp)
            })
            .await;

        if let Err(e) = result {
            warn!(sender = %payload.sender, error = %e, "Failed to persist chat message");
        }
    }

    async fn broadcast(&self, payload: ChatPayload) -> RouteOutcome {
        let sender = payload.sender.clone();
        let delivery = self.registry.for_each(&ServerEvent::Message(payload)).await;

        debug!(
            sender = %sender,
            delivered = delivery.delivered,
            dropped = delivery.dropped.len(),
            "Broadcast chat message"
        );
        RouteOutcome::Broadcast {
            delivered: delivery.delivered,
        }
    }

    async fn deliver_private(&self, receiver: Handle, payload: ChatPayload) -> RouteOutcome {
        let sender = payload.sender.clone();
        let targets = self.registry.connections_of(&receiver).await;
        let delivery = self
            .registry
            .deliver(&targets, &ServerEvent::Message(payload))
            .await;

        if delivery.delivered == 0 {
            return self.defer(receiver, sender).await;
        }

        // Nudge the same connections, minus any just dropped.
        let reachable: Vec<_> = targets
            .into_iter()
            .filter(|conn| !delivery.dropped.contains(&conn.id))
            .collect();
        self.registry
            .deliver(
                &reachable,
                &ServerEvent::Notification {
                    sender: sender.clone(),
                    id: None,
                },
            )
            .await;

        if let Err(e) = self.notifications.mark_delivered(&receiver, &sender).await {
            warn!(
                receiver = %receiver,
                sender = %sender,
                error = %e,
                "Failed to settle notifications after live delivery"
            );
        }

        info!(
            sender = %sender,
            receiver = %receiver,
            connections = delivery.delivered,
            "Private message delivered"
        );
        RouteOutcome::Delivered {
            receiver,
            connections: delivery.delivered,
        }
    }

    async fn defer(&self, receiver: Handle, sender: Handle) -> RouteOutcome {
        match self.notifications.record_undelivered(&receiver, &sender).await {
            Ok(id) => {
                debug!(receiver = %receiver, sender = %sender, notification = id, "Receiver offline, notification stored");
            }
            Err(e) if e.is_not_found() => {
                debug!(receiver = %receiver, "Private message to unknown receiver");
            }
            Err(e) => {
                warn!(receiver = %receiver, sender = %sender, error = %e, "Failed to store notification");
            }
        }
        RouteOutcome::Deferred { receiver }
    }
}
