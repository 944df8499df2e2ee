use crate::config::Config;
use crate::error::Result;
use crate::events::{EventSink, TracingEventSink};
use crate::ml::features::FeatureMap;
use crate::ml::models::{
    BatchPredictionItem, FeatureImportanceReport, ModelInfo, PredictionResult, TrainingResult,
    VersionSummary,
};
use crate::ml::prediction::PredictionEngine;
use crate::ml::training::{TrainingDataSource, TrainingPipeline};
use crate::registry::{ModelRegistry, RollbackOutcome};
use crate::state::{create_store, ModelStore};
use crate::tenant::TenantId;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Lead scoring service: the caller-facing contract over the registry,
/// training pipeline and prediction engine.
///
/// Every operation takes an optional tenant; `None` or a blank id means the
/// `"default"` tenant.
pub struct LeadScoringService {
    config: Config,
    registry: Arc<ModelRegistry>,
    pipeline: TrainingPipeline,
    engine: PredictionEngine,
}

impl LeadScoringService {
    /// Wire the service over an explicit store, data source and event sink
    pub async fn new(
        config: Config,
        store: Arc<dyn ModelStore>,
        source: Arc<dyn TrainingDataSource>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let registry = Arc::new(ModelRegistry::open(store, events.clone()).await?);
        let pipeline = TrainingPipeline::new(
            config.training.clone(),
            source,
            registry.clone(),
            events.clone(),
        );
        let engine = PredictionEngine::new(registry.clone(), config.prediction.clone(), events);

        info!(
            backend = ?config.registry.backend,
            min_training_rows = config.training.min_training_rows,
            "Lead scoring service initialized"
        );

        Ok(Self {
            config,
            registry,
            pipeline,
            engine,
        })
    }

    /// Build the configured store backend and log events through tracing
    pub async fn from_config(config: Config, source: Arc<dyn TrainingDataSource>) -> Result<Self> {
        let store = create_store(&config.registry).await?;
        Self::new(config, store, source, Arc::new(TracingEventSink)).await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub async fn predict(
        &self,
        features: &FeatureMap,
        tenant: Option<&str>,
    ) -> Result<PredictionResult> {
        let tenant = TenantId::resolve(tenant)?;
        self.engine.predict(&tenant, features).await
    }

    /// Predict against an explicit version instead of the active one
    pub async fn predict_with_version(
        &self,
        features: &FeatureMap,
        tenant: Option<&str>,
        version: &str,
    ) -> Result<PredictionResult> {
        let tenant = TenantId::resolve(tenant)?;
        self.engine
            .predict_with_version(&tenant, Some(version), features)
            .await
    }

    pub async fn predict_batch(
        &self,
        items: &[FeatureMap],
        tenant: Option<&str>,
    ) -> Result<Vec<BatchPredictionItem>> {
        let tenant = TenantId::resolve(tenant)?;
        self.engine.predict_batch(&tenant, items).await
    }

    pub async fn get_feature_importance(
        &self,
        tenant: Option<&str>,
    ) -> Result<FeatureImportanceReport> {
        let tenant = TenantId::resolve(tenant)?;
        self.engine.feature_importance(&tenant).await
    }

    /// Train a new version; never fails, see `TrainingResult`
    pub async fn train(&self, tenant: Option<&str>) -> TrainingResult {
        self.train_with_cancellation(tenant, CancellationToken::new())
            .await
    }

    pub async fn train_with_cancellation(
        &self,
        tenant: Option<&str>,
        cancel: CancellationToken,
    ) -> TrainingResult {
        match TenantId::resolve(tenant) {
            Ok(tenant) => self.pipeline.train_with_cancellation(&tenant, cancel).await,
            Err(e) => TrainingResult::Error {
                tenant_id: tenant.unwrap_or_default().to_string(),
                error: e.to_string(),
                error_code: e.error_code().to_string(),
            },
        }
    }

    pub async fn list_versions(&self, tenant: Option<&str>) -> Result<Vec<VersionSummary>> {
        let tenant = TenantId::resolve(tenant)?;
        self.registry.list_versions(&tenant).await
    }

    pub async fn rollback(&self, tenant: Option<&str>, version: &str) -> Result<RollbackOutcome> {
        let tenant = TenantId::resolve(tenant)?;
        self.registry.rollback(&tenant, version).await
    }

    /// Active version details, or `None` for a tenant that was never trained
    pub async fn get_model_info(&self, tenant: Option<&str>) -> Result<Option<ModelInfo>> {
        let tenant = TenantId::resolve(tenant)?;
        let Some(pointer) = self.registry.active_pointer(&tenant).await else {
            return Ok(None);
        };

        let metadata = self
            .registry
            .load_metadata_resolved(&tenant, &pointer.version)
            .await?;

        Ok(Some(ModelInfo {
            tenant_id: tenant.to_string(),
            version_id: pointer.version,
            activated_at: pointer.activated_at,
            is_rollback: pointer.is_rollback,
            model_type: metadata.model_type,
            metrics: metadata.metrics,
            feature_names: metadata.feature_names,
            training_data_size: metadata.training_data_size,
        }))
    }
}
