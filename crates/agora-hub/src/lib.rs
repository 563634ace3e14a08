//! # agora-hub
//!
//! The real-time side of the forum: live chat connections, presence, message
//! routing, and the notification ledger.
//!
//! A single [`Hub`] is built at startup and cloned into every connection
//! task and HTTP handler. It owns:
//! - the [`ConnectionRegistry`] of live connections
//! - a [`PresenceTracker`] that records online/offline and broadcasts the
//!   online list
//! - a [`MessageRouter`] for broadcast and private chat
//! - a [`NotificationService`] for messages that could not be delivered live
//!
//! All durable state goes through an [`agora_store::PersistenceGateway`].

pub mod error;
pub mod lifecycle;
pub mod notifications;
pub mod presence;
pub mod registry;
pub mod router;

mod persistence;

use std::sync::Arc;

use agora_shared::constants::{DEFAULT_HISTORY_PAGE_SIZE, DEFAULT_OUTBOUND_QUEUE_DEPTH};
use agora_shared::protocol::{ChatPayload, ServerEvent};
use agora_shared::{Handle, Identity};
use agora_store::{DirectoryEntry, PersistenceGateway};
use tracing::info;

pub use error::HubError;
pub use lifecycle::{run_session, serve, LifecycleState, Session};
pub use notifications::NotificationService;
pub use presence::PresenceTracker;
pub use registry::{ConnectionId, ConnectionRegistry, Delivery, Eviction};
pub use router::{MessageRouter, RouteOutcome};

use crate::persistence::Persistence;

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Frames buffered per connection; a peer that falls further behind is
    /// disconnected.
    pub outbound_queue_depth: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_queue_depth: DEFAULT_OUTBOUND_QUEUE_DEPTH,
        }
    }
}

#[derive(Clone)]
pub struct Hub {
    registry: ConnectionRegistry,
    presence: PresenceTracker,
    router: MessageRouter,
    notifications: NotificationService,
    store: Persistence,
    config: Arc<HubConfig>,
}

impl Hub {
    pub fn new(gateway: Arc<dyn PersistenceGateway>, config: HubConfig) -> Self {
        let store = Persistence::new(gateway);
        let registry = ConnectionRegistry::new();
        let notifications = NotificationService::new(store.clone());
        let presence = PresenceTracker::new(registry.clone(), store.clone());
        let router = MessageRouter::new(registry.clone(), store.clone(), notifications.clone());

        Self {
            registry,
            presence,
            router,
            notifications,
            store,
            config: Arc::new(config),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn notifications(&self) -> &NotificationService {
        &self.notifications
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &Persistence {
        &self.store
    }

    /// Tell every live connection that `handle` just registered.
    pub async fn announce_registration(&self, handle: &Handle) -> Result<Delivery, HubError> {
        let lookup = handle.clone();
        let user: Identity = self
            .store
            .call(move |gw| gw.find_identity_by_handle(&lookup))
            .await?;

        let delivery = self
            .registry
            .for_each(&ServerEvent::UserRegistered { user })
            .await;
        info!(handle = %handle, delivered = delivery.delivered, "Announced new user");
        Ok(delivery)
    }

    /// One page of the private conversation between `a` and `b`, oldest
    /// first. `limit` defaults to the standard page size.
    pub async fn history(
        &self,
        a: &Handle,
        b: &Handle,
        offset: u32,
        limit: Option<u32>,
    ) -> Result<Vec<ChatPayload>, HubError> {
        let (a, b) = (a.clone(), b.clone());
        let limit = limit.unwrap_or(DEFAULT_HISTORY_PAGE_SIZE);
        self.store
            .call(move |gw| gw.query_message_history(&a, &b, offset, limit))
            .await
    }

    /// Everyone except `viewer`, with their stored presence.
    pub async fn directory(&self, viewer: &Handle) -> Result<Vec<DirectoryEntry>, HubError> {
        let viewer = viewer.clone();
        self.store.call(move |gw| gw.list_directory(&viewer)).await
    }
}
