//! Connect → serve → disconnect for one client.
//!
//! [`Hub::connect`] authenticates the handle, gathers the initial payload,
//! registers the connection and announces it. [`run_session`] then pumps
//! frames in both directions until the peer goes away, and
//! [`Hub::disconnect`] tears the connection down.
//!
//! The transport is any `Stream` of inbound text frames plus any `Sink` of
//! outbound text frames, so the same code drives axum WebSockets and the
//! in-memory channels used in tests.

use std::fmt::Display;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use agora_shared::protocol::{ClientMessage, ConversationPartition, ServerEvent};
use agora_shared::{Handle, Identity};

use crate::error::HubError;
use crate::registry::{ConnectionId, Eviction};
use crate::Hub;

/// Where one connection is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Connecting,
    Authenticated,
    Active,
    Closing,
    Closed,
}

impl LifecycleState {
    fn can_advance_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Connecting, Authenticated)
                | (Authenticated, Active)
                | (Active, Closing)
                | (Closing, Closed)
        )
    }
}

#[derive(Debug)]
struct Lifecycle {
    id: ConnectionId,
    state: LifecycleState,
}

impl Lifecycle {
    fn new(id: ConnectionId) -> Self {
        Self {
            id,
            state: LifecycleState::Connecting,
        }
    }

    /// Move to `next`. An out-of-order transition is refused and leaves the
    /// state untouched.
    fn advance(&mut self, next: LifecycleState) -> bool {
        if !self.state.can_advance_to(next) {
            debug!(conn = %self.id, from = ?self.state, to = ?next, "Refused state transition");
            return false;
        }
        debug!(conn = %self.id, from = ?self.state, to = ?next, "Connection state");
        self.state = next;
        true
    }
}

/// An authenticated, registered connection.
#[derive(Debug)]
pub struct Session {
    pub id: ConnectionId,
    pub identity: Identity,
    /// Frames to write before anything from `outbound`: pending
    /// notifications (newest first) and the conversation partition.
    pub initial: Vec<ServerEvent>,
    pub outbound: mpsc::Receiver<ServerEvent>,
    eviction: Eviction,
    lifecycle: Lifecycle,
}

impl Session {
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state
    }
}

impl Hub {
    /// Authenticate `raw_handle` and bring the connection to `Active`.
    pub async fn connect(&self, raw_handle: &str) -> Result<Session, HubError> {
        let id = ConnectionId::new();
        let mut lifecycle = Lifecycle::new(id);

        let handle = Handle::new(raw_handle).map_err(|_| HubError::AuthenticationMissing)?;
        let identity = self.resolve_identity(&handle).await?;
        lifecycle.advance(LifecycleState::Authenticated);

        let mut initial = self.notifications().pending_events(&handle).await;
        initial.push(ServerEvent::ConversationData {
            data: self.conversation_partition(&handle).await,
        });

        let (tx, outbound) = mpsc::channel(self.config().outbound_queue_depth);
        let eviction = self.registry().register(id, identity.clone(), tx).await;
        self.presence().mark_online(&identity).await;
        lifecycle.advance(LifecycleState::Active);

        info!(
            conn = %id,
            handle = %handle,
            pending = initial.len() - 1,
            "Client connected"
        );

        Ok(Session {
            id,
            identity,
            initial,
            outbound,
            eviction,
            lifecycle,
        })
    }

    /// Tear down a session that will not be served, e.g. when the transport
    /// failed right after [`Hub::connect`].
    pub async fn disconnect(&self, session: Session) {
        let Session {
            identity,
            mut lifecycle,
            ..
        } = session;
        self.close(&mut lifecycle, &identity).await;
    }

    /// Remove the connection and announce the change. Offline is recorded
    /// only when the identity has no other live connection. Runs once per
    /// session; the registry entry may already be gone after an eviction.
    async fn close(&self, lifecycle: &mut Lifecycle, identity: &Identity) {
        if !lifecycle.advance(LifecycleState::Closing) {
            return;
        }

        match self.registry().deregister(lifecycle.id).await {
            Some(remaining) if remaining > 0 => {
                self.presence().broadcast().await;
            }
            _ => {
                self.presence().mark_offline(identity).await;
            }
        }

        lifecycle.advance(LifecycleState::Closed);
        info!(conn = %lifecycle.id, handle = %identity.handle, "Client disconnected");
    }

    async fn resolve_identity(&self, handle: &Handle) -> Result<Identity, HubError> {
        let lookup = handle.clone();
        match self
            .store()
            .call(move |gw| gw.find_identity_by_handle(&lookup))
            .await
        {
            Ok(identity) => Ok(identity),
            Err(e) if e.is_not_found() => Err(HubError::UnknownIdentity(handle.clone())),
            Err(e) => Err(e),
        }
    }

    async fn conversation_partition(&self, handle: &Handle) -> ConversationPartition {
        let lookup = handle.clone();
        match self
            .store()
            .call(move |gw| gw.query_conversation_partners(&lookup))
            .await
        {
            Ok(partition) => partition,
            Err(e) => {
                warn!(handle = %handle, error = %e, "Failed to load conversation partners");
                ConversationPartition::default()
            }
        }
    }
}

/// Connect `raw_handle` and serve it over `reader`/`writer` until close.
pub async fn serve<R, W, E>(hub: Hub, raw_handle: &str, reader: R, writer: W) -> Result<(), HubError>
where
    R: Stream<Item = Result<String, E>>,
    E: Display,
    W: Sink<String> + Send + 'static,
    W::Error: Display,
{
    let session = hub.connect(raw_handle).await?;
    run_session(hub, session, reader, writer).await;
    Ok(())
}

/// Pump an already connected session until the peer goes away, then
/// disconnect it.
///
/// Any read error, a malformed frame, or the end of the stream closes the
/// connection. So does the writer stopping after a failed write, and so does
/// the registry evicting this connection, even while a write is stuck on a
/// peer that stopped reading.
pub async fn run_session<R, W, E>(hub: Hub, session: Session, reader: R, writer: W)
where
    R: Stream<Item = Result<String, E>>,
    E: Display,
    W: Sink<String> + Send + 'static,
    W::Error: Display,
{
    let Session {
        id,
        identity,
        initial,
        outbound,
        mut eviction,
        mut lifecycle,
    } = session;

    let mut writer_task = tokio::spawn(write_frames(id, writer, initial, outbound));

    futures::pin_mut!(reader);
    loop {
        tokio::select! {
            biased;

            _ = eviction.wait() => {
                debug!(conn = %id, "Evicted by registry, closing");
                break;
            }
            frame = reader.next() => match frame {
                Some(Ok(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => {
                        hub.router().route(&identity, message).await;
                    }
                    Err(e) => {
                        debug!(conn = %id, error = %e, "Malformed frame, closing");
                        break;
                    }
                },
                Some(Err(e)) => {
                    debug!(conn = %id, error = %e, "Read error, closing");
                    break;
                }
                None => {
                    debug!(conn = %id, "Peer closed");
                    break;
                }
            },
            _ = &mut writer_task => {
                debug!(conn = %id, "Writer stopped, closing");
                break;
            }
        }
    }

    writer_task.abort();
    hub.close(&mut lifecycle, &identity).await;
}

async fn write_frames<W>(
    id: ConnectionId,
    writer: W,
    initial: Vec<ServerEvent>,
    mut outbound: mpsc::Receiver<ServerEvent>,
) where
    W: Sink<String>,
    W::Error: Display,
{
    futures::pin_mut!(writer);

    let mut pending = initial.into_iter();
    loop {
        let event = match pending.next() {
            Some(event) => event,
            None => match outbound.recv().await {
                Some(event) => event,
                None => break,
            },
        };

        let text = match serde_json::to_string(&event) {
            Ok(text) => text,
            Err(e) => {
                warn!(conn = %id, kind = event.kind(), error = %e, "Failed to encode frame");
                continue;
            }
        };

        if let Err(e) = writer.send(text).await {
            debug!(conn = %id, error = %e, "Write failed");
            break;
        }
    }
}
