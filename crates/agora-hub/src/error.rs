use thiserror::Error;

use agora_shared::Handle;
use agora_store::StoreError;

#[derive(Debug, Error)]
pub enum HubError {
    /// The transport supplied no usable handle. Nothing was allocated.
    #[error("No identity supplied at connect")]
    AuthenticationMissing,

    #[error("Unknown identity: {0}")]
    UnknownIdentity(Handle),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl HubError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, HubError::Persistence(StoreError::NotFound))
    }
}
