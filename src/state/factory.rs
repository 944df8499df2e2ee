use crate::config::{RegistryConfig, StoreBackend};
use crate::error::Result;
use crate::state::{FsModelStore, InMemoryModelStore, ModelStore, SledModelStore};
use std::sync::Arc;

/// Create a model store based on configuration
pub async fn create_store(config: &RegistryConfig) -> Result<Arc<dyn ModelStore>> {
    match config.backend {
        StoreBackend::Filesystem => {
            tracing::info!(root = ?config.root, "Initializing filesystem storage backend");
            let store = FsModelStore::new(&config.root).await?;
            Ok(Arc::new(store))
        }

        StoreBackend::Sled => {
            tracing::info!(path = ?config.root, "Initializing Sled storage backend");
            let store = SledModelStore::new(&config.root)?;
            Ok(Arc::new(store))
        }

        StoreBackend::InMemory => Ok(create_in_memory_store()),
    }
}

/// Create an in-memory store (for testing and development)
pub fn create_in_memory_store() -> Arc<dyn ModelStore> {
    tracing::info!("Initializing in-memory storage backend");
    Arc::new(InMemoryModelStore::new())
}
