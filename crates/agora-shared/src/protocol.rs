//! JSON frames exchanged over the chat socket.
//!
//! Inbound frames are plain [`ClientMessage`] objects. Every outbound frame is
//! a [`ServerEvent`], tagged by its `type` field so the browser can dispatch
//! on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Handle, Identity};

/// One unit sent by a client. An empty or missing `receiver` makes it a
/// broadcast.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientMessage {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub receiver: Option<String>,
    #[serde(default)]
    pub content: String,
    /// Client clock, informational only. The server stamps its own time.
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl ClientMessage {
    /// The private receiver, or `None` for a broadcast.
    pub fn receiver_handle(&self) -> Option<Handle> {
        self.receiver
            .as_deref()
            .and_then(|raw| Handle::new(raw).ok())
    }
}

/// A chat line as delivered live and as returned by the history query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatPayload {
    pub sender: Handle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<Handle>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "firstName")]
    pub first_name: String,
    #[serde(rename = "lastName")]
    pub last_name: String,
}

/// The users a client has talked to before, and everyone else.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationPartition {
    #[serde(rename = "withConversations")]
    pub with_history: Vec<Handle>,
    #[serde(rename = "withoutConversations")]
    pub without_history: Vec<Handle>,
}

/// Every frame the server pushes to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    /// A chat line, broadcast or private.
    Message(ChatPayload),

    /// Snapshot of every live connection's identity, in connection order.
    OnlineUsers { users: Vec<Identity> },

    /// Someone sent this client a private message. `id` is set when the
    /// frame is flushed from the stored ledger on connect.
    Notification {
        sender: Handle,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<i64>,
    },

    /// Sent once after connect.
    ConversationData { data: ConversationPartition },

    /// A new account was created.
    UserRegistered { user: Identity },
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Message(_) => "message",
            ServerEvent::OnlineUsers { .. } => "onlineUsers",
            ServerEvent::Notification { .. } => "notification",
            ServerEvent::ConversationData { .. } => "conversationData",
            ServerEvent::UserRegistered { .. } => "userRegistered",
        }
    }
}
