//! # agora-shared
//!
//! Types shared by every agora crate: the identity newtypes, the JSON wire
//! protocol spoken over the chat socket, and protocol constants.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::IdentityError;
pub use types::{Handle, Identity};
