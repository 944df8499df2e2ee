use crate::error::{AppError, Result};
use crate::events::{EventSink, LifecycleEvent};
use crate::ml::classifier::ModelArtifact;
use crate::ml::models::{ModelVersion, NewVersion, VersionSummary};
use crate::registry::layout::{self, INDEX_KEY};
use crate::registry::{ActivePointer, RegistryIndex, VersionAllocator, VersionId};
use crate::state::ModelStore;
use crate::tenant::TenantId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Result of a successful rollback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub tenant_id: String,
    pub version_id: VersionId,
    pub previous_version: Option<VersionId>,
    pub activated_at: DateTime<Utc>,
}

/// Versioned, per-tenant model registry.
///
/// Artifacts and metadata are immutable once written and are read without
/// locking. The pointer index is loaded once at open and written through to
/// the store before the in-memory copy changes.
pub struct ModelRegistry {
    store: Arc<dyn ModelStore>,
    index: RwLock<RegistryIndex>,
    /// Serializes writes of the single index document
    index_writer: Mutex<()>,
    /// Serializes pointer read-modify-write per tenant
    tenant_locks: DashMap<String, Arc<Mutex<()>>>,
    allocator: VersionAllocator,
    events: Arc<dyn EventSink>,
}

impl ModelRegistry {
    /// Open the registry, loading the pointer index from the store
    pub async fn open(store: Arc<dyn ModelStore>, events: Arc<dyn EventSink>) -> Result<Self> {
        let index = match store.get(INDEX_KEY).await? {
            Some(bytes) => RegistryIndex::from_json(&bytes).map_err(|e| {
                AppError::Storage(format!("Corrupt pointer index {}: {}", INDEX_KEY, e))
            })?,
            None => RegistryIndex::default(),
        };

        tracing::info!(
            backend = %store.describe(),
            tenants = index.len(),
            "Model registry opened"
        );

        Ok(Self {
            store,
            index: RwLock::new(index),
            index_writer: Mutex::new(()),
            tenant_locks: DashMap::new(),
            allocator: VersionAllocator::new(),
            events,
        })
    }

    fn tenant_lock(&self, tenant: &TenantId) -> Arc<Mutex<()>> {
        self.tenant_locks
            .entry(tenant.as_str().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn stored_versions(&self, tenant: &TenantId) -> Result<Vec<VersionId>> {
        let keys = self.store.list(&layout::tenant_prefix(tenant.as_str())).await?;
        Ok(keys
            .iter()
            .filter_map(|key| layout::parse_model_key(tenant.as_str(), key))
            .collect())
    }

    /// Persist a new version and make it active.
    ///
    /// The artifact and metadata are written first; the pointer moves only
    /// after both writes succeed, so a failure leaves the previous pointer
    /// in place and the new files orphaned.
    pub async fn save(
        &self,
        tenant: &TenantId,
        artifact: &ModelArtifact,
        new_version: NewVersion,
    ) -> Result<VersionId> {
        if !self.allocator.is_seeded(tenant.as_str()) {
            let existing = self.stored_versions(tenant).await?;
            self.allocator.seed(tenant.as_str(), existing.iter());
        }

        let created_at = Utc::now();
        let version_id = self.allocator.next_at(tenant.as_str(), created_at);
        let training_data_size = new_version.training_data_size;
        let metadata = new_version.into_version(tenant.as_str(), version_id.clone(), created_at);

        let artifact_bytes = artifact.to_bytes()?;
        let metadata_bytes = serde_json::to_vec_pretty(&metadata)?;

        self.store
            .put(&layout::model_key(tenant.as_str(), &version_id), artifact_bytes)
            .await?;
        self.store
            .put(&layout::metadata_key(tenant.as_str(), &version_id), metadata_bytes)
            .await?;

        {
            let lock = self.tenant_lock(tenant);
            let _guard = lock.lock().await;
            self.publish_pointer(tenant, ActivePointer::published(version_id.clone()))
                .await?;
        }

        tracing::info!(
            tenant_id = %tenant,
            version_id = %version_id,
            training_data_size,
            "Model version published"
        );
        self.events.emit(LifecycleEvent::VersionPublished {
            tenant_id: tenant.to_string(),
            version_id: version_id.to_string(),
            training_data_size,
            at: created_at,
        });

        Ok(version_id)
    }

    /// Resolve an explicit or the active version id
    pub async fn resolve_version(
        &self,
        tenant: &TenantId,
        version: Option<&str>,
    ) -> Result<VersionId> {
        match version {
            Some(raw) if layout::is_valid_version(raw) => Ok(VersionId::new(raw)),
            Some(raw) => Err(AppError::version_not_found(tenant.as_str(), raw)),
            None => self
                .get_active_version(tenant)
                .await
                .ok_or_else(|| AppError::not_found(tenant.as_str())),
        }
    }

    /// Load an artifact, defaulting to the active version
    pub async fn load(&self, tenant: &TenantId, version: Option<&str>) -> Result<ModelArtifact> {
        let version_id = self.resolve_version(tenant, version).await?;
        self.load_resolved(tenant, &version_id).await
    }

    pub(crate) async fn load_resolved(
        &self,
        tenant: &TenantId,
        version_id: &VersionId,
    ) -> Result<ModelArtifact> {
        let key = layout::model_key(tenant.as_str(), version_id);
        match self.store.get(&key).await? {
            Some(bytes) => ModelArtifact::from_bytes(&bytes),
            None => Err(AppError::version_not_found(tenant.as_str(), version_id.as_str())),
        }
    }

    /// Load a version's metadata, defaulting to the active version.
    ///
    /// A missing or unreadable metadata document next to an existing
    /// artifact yields a placeholder rather than an error.
    pub async fn load_metadata(
        &self,
        tenant: &TenantId,
        version: Option<&str>,
    ) -> Result<ModelVersion> {
        let version_id = self.resolve_version(tenant, version).await?;
        self.load_metadata_resolved(tenant, &version_id).await
    }

    pub(crate) async fn load_metadata_resolved(
        &self,
        tenant: &TenantId,
        version_id: &VersionId,
    ) -> Result<ModelVersion> {
        let key = layout::metadata_key(tenant.as_str(), version_id);
        if let Some(bytes) = self.store.get(&key).await? {
            match serde_json::from_slice::<ModelVersion>(&bytes) {
                Ok(metadata) => return Ok(metadata),
                Err(e) => tracing::warn!(
                    tenant_id = %tenant,
                    version_id = %version_id,
                    error = %e,
                    "Unreadable metadata document, using placeholder"
                ),
            }
        }

        if self
            .store
            .exists(&layout::model_key(tenant.as_str(), version_id))
            .await?
        {
            Ok(ModelVersion::placeholder(tenant.as_str(), version_id.clone()))
        } else {
            Err(AppError::version_not_found(tenant.as_str(), version_id.as_str()))
        }
    }

    /// All stored versions, newest first
    pub async fn list_versions(&self, tenant: &TenantId) -> Result<Vec<VersionSummary>> {
        let versions = self.stored_versions(tenant).await?;
        let active = self.get_active_version(tenant).await;

        let metadata = join_all(
            versions
                .iter()
                .map(|version_id| self.load_metadata_resolved(tenant, version_id)),
        )
        .await;

        let mut summaries = Vec::with_capacity(versions.len());
        for (version_id, metadata) in versions.into_iter().zip(metadata) {
            let metadata = match metadata {
                Ok(metadata) => metadata,
                // Pruned between list and read
                Err(AppError::VersionNotFound { .. }) => continue,
                Err(e) => return Err(e),
            };
            summaries.push(VersionSummary {
                is_active: active.as_ref() == Some(&version_id),
                created_at: metadata.created_at.or_else(|| version_id.timestamp()),
                metrics: metadata.metrics,
                version_id,
            });
        }

        summaries.sort_by(|a, b| b.version_id.cmp(&a.version_id));
        Ok(summaries)
    }

    /// Point the tenant at an existing version without touching any artifact
    pub async fn rollback(&self, tenant: &TenantId, version: &str) -> Result<RollbackOutcome> {
        if !layout::is_valid_version(version) {
            return Err(AppError::version_not_found(tenant.as_str(), version));
        }
        let version_id = VersionId::new(version);

        let lock = self.tenant_lock(tenant);
        let _guard = lock.lock().await;

        if !self
            .store
            .exists(&layout::model_key(tenant.as_str(), &version_id))
            .await?
        {
            return Err(AppError::version_not_found(tenant.as_str(), version));
        }

        let previous_version = self.get_active_version(tenant).await;
        let pointer = ActivePointer::rolled_back(version_id.clone());
        let activated_at = pointer.activated_at;
        self.publish_pointer(tenant, pointer).await?;

        tracing::info!(
            tenant_id = %tenant,
            from = ?previous_version.as_ref().map(VersionId::as_str),
            to = %version_id,
            "Model rolled back"
        );
        self.events.emit(LifecycleEvent::RolledBack {
            tenant_id: tenant.to_string(),
            from_version: previous_version.as_ref().map(ToString::to_string),
            to_version: version_id.to_string(),
            at: activated_at,
        });

        Ok(RollbackOutcome {
            tenant_id: tenant.to_string(),
            version_id,
            previous_version,
            activated_at,
        })
    }

    pub async fn get_active_version(&self, tenant: &TenantId) -> Option<VersionId> {
        self.active_pointer(tenant).await.map(|p| p.version)
    }

    pub async fn active_pointer(&self, tenant: &TenantId) -> Option<ActivePointer> {
        self.index.read().await.get(tenant.as_str()).cloned()
    }

    /// Write-ahead pointer update: persist the new index, then swap it in.
    /// Callers hold the tenant lock.
    async fn publish_pointer(&self, tenant: &TenantId, pointer: ActivePointer) -> Result<()> {
        let _writer = self.index_writer.lock().await;

        let next = self.index.read().await.with_pointer(tenant.as_str(), pointer);
        self.store.put(INDEX_KEY, next.to_json()?).await?;

        *self.index.write().await = next;
        Ok(())
    }
}
