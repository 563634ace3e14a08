//! v001 -- Initial schema creation.
//!
//! Creates the tables the chat hub reads and writes: `users`, `chats`,
//! `user_status`, and `notifications`. The forum's post and comment tables
//! live elsewhere.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (written by the registration flow, read by the hub)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    nickname   TEXT UNIQUE NOT NULL,
    first_name TEXT NOT NULL,
    last_name  TEXT NOT NULL,
    created_at TEXT NOT NULL                  -- RFC-3339, microsecond precision
);

-- ----------------------------------------------------------------
-- Chat log (append-only)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    sender_id   INTEGER NOT NULL,
    receiver_id INTEGER,                      -- NULL = broadcast or unresolved receiver
    message     TEXT NOT NULL,
    sent_at     TEXT NOT NULL,
    meta_data   TEXT DEFAULT NULL,            -- JSON, see models::ChatMeta

    FOREIGN KEY (sender_id)   REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (receiver_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chats_pair
    ON chats(sender_id, receiver_id, sent_at DESC);
CREATE INDEX IF NOT EXISTS idx_chats_receiver
    ON chats(receiver_id);

-- ----------------------------------------------------------------
-- Presence (one row per user that has ever connected)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS user_status (
    user_id   INTEGER PRIMARY KEY NOT NULL,
    is_online INTEGER NOT NULL DEFAULT 0,     -- boolean 0/1
    last_seen TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Notification ledger
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS notifications (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id    INTEGER NOT NULL,              -- recipient
    sender_id  INTEGER NOT NULL,
    is_read    INTEGER NOT NULL DEFAULT 0,    -- boolean 0/1
    created_at TEXT NOT NULL,

    FOREIGN KEY (user_id)   REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (sender_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_notifications_recipient
    ON notifications(user_id, is_read, created_at DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
