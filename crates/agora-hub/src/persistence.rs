use std::sync::Arc;

use agora_store::PersistenceGateway;

use crate::error::HubError;

/// Async face of the [`PersistenceGateway`]: every call runs on the blocking
/// pool so a slow disk never stalls a connection task.
#[derive(Clone)]
pub(crate) struct Persistence {
    gateway: Arc<dyn PersistenceGateway>,
}

impl Persistence {
    pub(crate) fn new(gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self { gateway }
    }

    pub(crate) async fn call<T, F>(&self, f: F) -> Result<T, HubError>
    where
        F: FnOnce(&dyn PersistenceGateway) -> agora_store::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let gateway = self.gateway.clone();
        let result = tokio::task::spawn_blocking(move || f(gateway.as_ref())).await?;
        Ok(result?)
    }
}
