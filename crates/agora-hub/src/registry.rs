//! Live connections, each bound to the identity that opened it.
//!
//! Every connection is represented by the sending half of its bounded
//! outbound queue. The registry lock only ever guards the in-memory list:
//! fan-out snapshots the list, pushes frames with `try_send` outside the
//! lock, then re-locks to drop the connections whose queue was full or
//! closed. A dropped connection is told so through its [`Eviction`]
//! handle, which its session watches to run the normal close path.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use agora_shared::protocol::ServerEvent;
use agora_shared::{Handle, Identity};

/// Sending half of a connection's outbound queue.
pub type OutboundSender = mpsc::Sender<ServerEvent>;

/// Opaque handle of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resolves once the registry no longer holds the connection it was
/// issued for.
#[derive(Debug)]
pub struct Eviction(watch::Receiver<bool>);

impl Eviction {
    pub async fn wait(&mut self) {
        // An error means the entry, and its sender with it, is gone.
        let _ = self.0.wait_for(|evicted| *evicted).await;
    }

    pub fn is_evicted(&self) -> bool {
        *self.0.borrow()
    }
}

#[derive(Debug, Clone)]
pub struct RegisteredConnection {
    pub id: ConnectionId,
    pub identity: Identity,
    sender: OutboundSender,
    evicted: Arc<watch::Sender<bool>>,
}

impl RegisteredConnection {
    /// Queue a frame without waiting. Fails when the peer has stopped
    /// draining its queue or has gone away.
    fn try_deliver(&self, event: ServerEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    conn = %self.id,
                    handle = %self.identity.handle,
                    "Outbound queue full, dropping stalled connection"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(
                    conn = %self.id,
                    handle = %self.identity.handle,
                    "Outbound queue closed"
                );
                false
            }
        }
    }
}

/// Result of pushing one frame to a set of connections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: Vec<ConnectionId>,
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    entries: Arc<Mutex<Vec<RegisteredConnection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. The same identity may hold several connections.
    pub async fn register(
        &self,
        id: ConnectionId,
        identity: Identity,
        sender: OutboundSender,
    ) -> Eviction {
        let (evicted, watcher) = watch::channel(false);
        let mut entries = self.entries.lock().await;
        let handle = identity.handle.clone();
        entries.push(RegisteredConnection {
            id,
            identity,
            sender,
            evicted: Arc::new(evicted),
        });

        info!(
            conn = %id,
            handle = %handle,
            connections = entries.len(),
            "Connection registered"
        );
        Eviction(watcher)
    }

    /// Remove a connection. Returns how many connections its identity still
    /// holds, counted under the same lock, or `None` when it was already
    /// gone.
    pub async fn deregister(&self, id: ConnectionId) -> Option<usize> {
        let mut entries = self.entries.lock().await;
        let index = entries.iter().position(|entry| entry.id == id)?;
        let removed = entries.remove(index);

        let remaining = entries
            .iter()
            .filter(|entry| entry.identity.handle == removed.identity.handle)
            .count();
        info!(
            conn = %id,
            handle = %removed.identity.handle,
            remaining,
            connections = entries.len(),
            "Connection deregistered"
        );
        Some(remaining)
    }

    /// Copy of every registered connection, in registration order.
    pub async fn snapshot(&self) -> Vec<RegisteredConnection> {
        self.entries.lock().await.clone()
    }

    pub async fn connections_of(&self, handle: &Handle) -> Vec<RegisteredConnection> {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|entry| &entry.identity.handle == handle)
            .cloned()
            .collect()
    }

    pub async fn count_for(&self, handle: &Handle) -> usize {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|entry| &entry.identity.handle == handle)
            .count()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Push `event` to every target, then drop the targets that failed.
    pub async fn deliver(&self, targets: &[RegisteredConnection], event: &ServerEvent) -> Delivery {
        let mut delivery = Delivery::default();
        for target in targets {
            if target.try_deliver(event.clone()) {
                delivery.delivered += 1;
            } else {
                delivery.dropped.push(target.id);
            }
        }

        if !delivery.dropped.is_empty() {
            self.evict(&delivery.dropped).await;
        }
        delivery
    }

    /// Push `event` to a snapshot of every live connection.
    pub async fn for_each(&self, event: &ServerEvent) -> Delivery {
        let targets = self.snapshot().await;
        self.deliver(&targets, event).await
    }

    async fn evict(&self, ids: &[ConnectionId]) {
        let mut entries = self.entries.lock().await;
        entries.retain(|entry| {
            if ids.contains(&entry.id) {
                entry.evicted.send_replace(true);
                false
            } else {
                true
            }
        });
        debug!(evicted = ids.len(), connections = entries.len(), "Dropped dead connections");
    }
}
