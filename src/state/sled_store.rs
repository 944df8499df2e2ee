use crate::error::{AppError, Result};
use crate::state::ModelStore;
use async_trait::async_trait;
use sled::Db;
use std::path::Path;
use std::sync::Arc;

/// Persistent model store using Sled embedded database
#[derive(Clone)]
pub struct SledModelStore {
    db: Arc<Db>,
    blobs_tree: sled::Tree,
}

impl SledModelStore {
    /// Create a new Sled store at the specified path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref();
        let db = sled::open(path_str)
            .map_err(|e| AppError::Storage(format!("Failed to open Sled database: {}", e)))?;

        let blobs_tree = db
            .open_tree("model_blobs")
            .map_err(|e| AppError::Storage(format!("Failed to open model_blobs tree: {}", e)))?;

        tracing::info!("Initialized Sled model store at {:?}", path_str);

        Ok(Self {
            db: Arc::new(db),
            blobs_tree,
        })
    }

    /// Get database size in bytes
    pub fn size_on_disk(&self) -> Result<u64> {
        self.db
            .size_on_disk()
            .map_err(|e| AppError::Storage(format!("Failed to get database size: {}", e)))
    }
}

#[async_trait]
impl ModelStore for SledModelStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.blobs_tree
            .insert(key.as_bytes(), bytes)
            .map_err(|e| AppError::Storage(format!("Failed to write {}: {}", key, e)))?;

        // Flush to ensure durability
        self.blobs_tree
            .flush_async()
            .await
            .map_err(|e| AppError::Storage(format!("Failed to flush model_blobs tree: {}", e)))?;

        tracing::debug!(key = %key, "Blob written to Sled");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.blobs_tree.get(key.as_bytes()) {
            Ok(Some(bytes)) => Ok(Some(bytes.to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(AppError::Storage(format!("Failed to read {}: {}", key, e))),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.blobs_tree
            .contains_key(key.as_bytes())
            .map_err(|e| AppError::Storage(format!("Failed to check {}: {}", key, e)))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();

        // Sled iterates in key order
        for result in self.blobs_tree.scan_prefix(prefix.as_bytes()) {
            let (key, _) =
                result.map_err(|e| AppError::Storage(format!("Failed to scan keys: {}", e)))?;
            match String::from_utf8(key.to_vec()) {
                Ok(key) => keys.push(key),
                Err(_) => tracing::warn!("Skipping non UTF-8 key in model_blobs tree"),
            }
        }

        Ok(keys)
    }

    fn describe(&self) -> String {
        "sled".to_string()
    }
}
