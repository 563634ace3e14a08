//! Rows the store hands back to the hub and the HTTP layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agora_shared::{Handle, Identity};

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// Online flag plus the time of the last connect/disconnect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceRecord {
    pub handle: Handle,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Chat log
// ---------------------------------------------------------------------------

/// Optional metadata stored alongside a chat row.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMeta {
    /// Receiver handle that did not resolve to a user when the row was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unresolved_receiver: Option<String>,
}

/// Where a chat row is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient<'a> {
    Everyone,
    User(&'a Handle),
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// An unread notification, resolved to the sender's handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationRecord {
    pub id: i64,
    pub sender: Handle,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

/// One row of the user directory shown next to the chat panel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectoryEntry {
    #[serde(flatten)]
    pub identity: Identity,
    #[serde(rename = "isOnline")]
    pub is_online: bool,
    #[serde(rename = "lastSeen", skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}
