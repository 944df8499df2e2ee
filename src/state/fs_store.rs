use crate::error::{AppError, Result};
use crate::state::ModelStore;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const TMP_MARKER: &str = ".tmp-";

/// Filesystem store: one file per key under `root`.
///
/// Writes go to a sibling temp file which is fsynced and then renamed over
/// the target, so a crash leaves either the old file or the new one.
#[derive(Debug, Clone)]
pub struct FsModelStore {
    root: PathBuf,
}

impl FsModelStore {
    /// Create a store rooted at `root`, creating the directory if needed
    pub async fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            AppError::Storage(format!("Failed to create store root {:?}: {}", root, e))
        })?;

        tracing::info!("Initialized filesystem model store at {:?}", root);
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(AppError::Validation(format!("invalid store key: {}", key)));
            }
            path.push(segment);
        }
        Ok(path)
    }

    async fn sync_dir(dir: &Path) {
        // Persist the rename itself; not supported on every platform.
        if let Ok(handle) = tokio::fs::File::open(dir).await {
            let _ = handle.sync_all().await;
        }
    }
}

#[async_trait]
impl ModelStore for FsModelStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.path_for(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| AppError::Storage(format!("key has no parent: {}", key)))?
            .to_path_buf();

        tokio::fs::create_dir_all(&parent).await.map_err(|e| {
            AppError::Storage(format!("Failed to create directory {:?}: {}", parent, e))
        })?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AppError::Storage(format!("invalid file name for key {}", key)))?;
        let tmp_path = parent.join(format!("{}{}{}", file_name, TMP_MARKER, uuid::Uuid::new_v4()));

        let write = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            tokio::fs::rename(&tmp_path, &path).await
        };

        if let Err(e) = write.await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(AppError::Storage(format!("Failed to write {}: {}", key, e)));
        }

        Self::sync_dir(&parent).await;
        tracing::debug!(key = %key, bytes = bytes.len(), "Blob written to filesystem store");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Storage(format!("Failed to read {}: {}", key, e))),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::Storage(format!("Failed to stat {}: {}", key, e))),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // Prefixes are directory-aligned ("tenant/"); list that directory.
        let (dir_key, name_prefix) = match prefix.rfind('/') {
            Some(idx) => (&prefix[..idx], &prefix[idx + 1..]),
            None => ("", prefix),
        };
        let dir = if dir_key.is_empty() {
            self.root.clone()
        } else {
            self.path_for(dir_key)?
        };

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(AppError::Storage(format!(
                    "Failed to list {:?}: {}",
                    dir, e
                )))
            }
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.contains(TMP_MARKER) || !name.starts_with(name_prefix) {
                continue;
            }
            keys.push(if dir_key.is_empty() {
                name
            } else {
                format!("{}/{}", dir_key, name)
            });
        }

        keys.sort();
        Ok(keys)
    }

    fn describe(&self) -> String {
        format!("filesystem:{}", self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_creates_tenant_directory() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsModelStore::new(temp_dir.path()).await.unwrap();

        store.put("acme/model_v1.bin", vec![7; 16]).await.unwrap();

        assert!(temp_dir.path().join("acme").join("model_v1.bin").exists());
        assert_eq!(store.get("acme/model_v1.bin").await.unwrap(), Some(vec![7; 16]));
    }

    #[tokio::test]
    async fn test_overwrite_leaves_no_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsModelStore::new(temp_dir.path()).await.unwrap();

        store.put("registry.json", b"{}".to_vec()).await.unwrap();
        store.put("registry.json", b"{\"a\":1}".to_vec()).await.unwrap();

        let keys = store.list("").await.unwrap();
        assert_eq!(keys, vec!["registry.json".to_string()]);
        assert_eq!(
            store.get("registry.json").await.unwrap().unwrap(),
            b"{\"a\":1}".to_vec()
        );
    }

    #[tokio::test]
    async fn test_list_missing_directory_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsModelStore::new(temp_dir.path()).await.unwrap();

        assert!(store.list("nobody/").await.unwrap().is_empty());
        assert!(!store.exists("nobody/model_v1.bin").await.unwrap());
    }

    #[tokio::test]
    async fn test_traversal_keys_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsModelStore::new(temp_dir.path()).await.unwrap();

        assert!(store.put("../escape", vec![]).await.is_err());
        assert!(store.get("acme/../../etc").await.is_err());
    }
}
