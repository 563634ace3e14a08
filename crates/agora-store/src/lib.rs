//! # agora-store
//!
//! SQLite persistence for the agora chat hub.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for the four
//! tables the hub touches (`users`, `chats`, `user_status`,
//! `notifications`), plus the [`PersistenceGateway`] trait through which the
//! hub reaches them.

pub mod chats;
pub mod database;
pub mod gateway;
pub mod migrations;
pub mod models;
pub mod notifications;
pub mod presence;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use gateway::{PersistenceGateway, SqliteGateway};
pub use models::*;
