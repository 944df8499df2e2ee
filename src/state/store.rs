use crate::error::{AppError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Durable key-addressed byte store backing the model registry.
///
/// Keys are `/`-separated relative paths such as `acme/model_v<id>.bin`.
/// A successful `put` must be durable and atomic: readers observe either the
/// previous value or the complete new one, never a prefix.
#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Write a blob, replacing any previous value
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    /// Read a blob
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Check whether a key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// List keys that start with `prefix`, in ascending order
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Human readable backend description for logs
    fn describe(&self) -> String;
}

/// In-memory store (for testing and embedding)
#[derive(Clone, Default)]
pub struct InMemoryModelStore {
    blobs: Arc<DashMap<String, Vec<u8>>>,
    fail_puts: Arc<Mutex<Vec<String>>>,
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put` whose key contains `fragment` fail with a
    /// storage error. Used to exercise partial-publication paths.
    pub fn fail_puts_containing(&self, fragment: impl Into<String>) {
        self.fail_puts.lock().push(fragment.into());
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        self.fail_puts.lock().clear();
    }

    /// Drop a key, simulating external pruning or a torn write
    pub fn remove(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.remove(key).map(|(_, bytes)| bytes)
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl ModelStore for InMemoryModelStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        if self.fail_puts.lock().iter().any(|f| key.contains(f.as_str())) {
            return Err(AppError::Storage(format!("injected write failure for {}", key)));
        }

        self.blobs.insert(key.to_string(), bytes);
        tracing::debug!(key = %key, "Blob written to memory store");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.get(key).map(|entry| entry.value().clone()))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.blobs.contains_key(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .blobs
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn describe(&self) -> String {
        "in-memory".to_string()
    }
}
