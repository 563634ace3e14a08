//! Online/offline bookkeeping and the "who's online" broadcast.
//!
//! Persistence is best-effort here: a failed status write is logged and the
//! broadcast still goes out.
//!
//! Status writes are serialized and checked against the registry at write
//! time, so when connects and disconnects of the same identity interleave the
//! stored flag ends up matching whether the identity still has a live
//! connection.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use agora_shared::protocol::ServerEvent;
use agora_shared::Identity;

use crate::persistence::Persistence;
use crate::registry::{ConnectionRegistry, Delivery};

#[derive(Clone)]
pub struct PresenceTracker {
    registry: ConnectionRegistry,
    store: Persistence,
    writes: Arc<Mutex<()>>,
}

impl PresenceTracker {
    pub(crate) fn new(registry: ConnectionRegistry, store: Persistence) -> Self {
        Self {
            registry,
            store,
            writes: Arc::new(Mutex::new(())),
        }
    }

    pub async fn mark_online(&self, identity: &Identity) -> Delivery {
        self.persist(identity, true).await;
        self.broadcast().await
    }

    pub async fn mark_offline(&self, identity: &Identity) -> Delivery {
        self.persist(identity, false).await;
        self.broadcast().await
    }

    /// Identities of all live connections, in connection order. An identity
    /// connected twice appears twice.
    pub async fn online_users(&self) -> Vec<Identity> {
        self.registry
            .snapshot()
            .await
            .into_iter()
            .map(|conn| conn.identity)
            .collect()
    }

    /// Send the current snapshot to everyone in it.
    pub async fn broadcast(&self) -> Delivery {
        let targets = self.registry.snapshot().await;
        let users = targets.iter().map(|conn| conn.identity.clone()).collect();
        let delivery = self
            .registry
            .deliver(&targets, &ServerEvent::OnlineUsers { users })
            .await;

        debug!(
            online = targets.len(),
            delivered = delivery.delivered,
            dropped = delivery.dropped.len(),
            "Presence broadcast"
        );
        delivery
    }

    async fn persist(&self, identity: &Identity, is_online: bool) {
        let _write = self.writes.lock().await;

        let live = self.registry.count_for(&identity.handle).await;
        if (live > 0) != is_online {
            debug!(
                handle = %identity.handle,
                is_online,
                live,
                "Presence changed before the write, skipping"
            );
            return;
        }

        let handle = identity.handle.clone();
        let result = self
            .store
            .call(move |gw| gw.upsert_presence(&handle, is_online))
            .await;

        if let Err(e) = result {
            warn!(
                handle = %identity.handle,
                is_online,
                error = %e,
                "Failed to persist presence"
            );
        }
    }
}
