use crate::config::PredictionConfig;
use crate::error::{AppError, Result};
use crate::events::{EventSink, LifecycleEvent};
use crate::ml::classifier::{Classifier, ModelArtifact};
use crate::ml::features::{FeatureMap, FeatureVectorizer};
use crate::ml::models::{
    BatchItemError, BatchPredictionItem, FeatureContribution, FeatureImportance,
    FeatureImportanceReport, ModelVersion, PredictionResult, RecommendedAction,
};
use crate::registry::{ModelRegistry, VersionId};
use crate::state::AppCache;
use crate::tenant::TenantId;
use ndarray::Array2;
use std::sync::Arc;
use std::time::Duration;

/// A decoded version ready to serve, bound to its own feature layout
pub struct ServingModel {
    pub metadata: ModelVersion,
    pub artifact: ModelArtifact,
    pub vectorizer: FeatureVectorizer,
}

impl ServingModel {
    /// Bind an artifact to the layout recorded in its metadata, or to the
    /// artifact's own layout when the metadata carries none.
    pub fn new(metadata: ModelVersion, artifact: ModelArtifact) -> Self {
        let schema = if metadata.feature_names.is_empty() {
            artifact.feature_names.clone()
        } else {
            metadata.feature_names.clone()
        };

        Self {
            metadata,
            artifact,
            vectorizer: FeatureVectorizer::new(schema),
        }
    }

    pub fn version_id(&self) -> &VersionId {
        &self.metadata.version_id
    }

    /// Score one request
    pub fn predict(&self, features: &FeatureMap, top_contributions: usize) -> Result<PredictionResult> {
        let vector = self.vectorizer.transform(features)?;
        let x = Array2::from_shape_vec((1, vector.len()), vector.clone())
            .map_err(|e| AppError::Internal(format!("Failed to shape feature vector: {}", e)))?;

        let probability = self
            .artifact
            .classifier
            .predict_proba(&x)?
            .first()
            .copied()
            .ok_or_else(|| AppError::Internal("Classifier returned no probability".to_string()))?;
        let confidence = probability.max(1.0 - probability);

        Ok(PredictionResult {
            prediction: u8::from(probability > 0.5),
            conversion_probability: probability,
            confidence,
            model_version: self.version_id().clone(),
            recommended_action: RecommendedAction::from_scores(probability, confidence),
            feature_contributions: self.contributions(&vector, top_contributions),
        })
    }

    /// Top features by |value x importance|; empty without importances
    fn contributions(&self, vector: &[f64], limit: usize) -> Vec<FeatureContribution> {
        let Some(importances) = self.artifact.classifier.feature_importances() else {
            return Vec::new();
        };

        let mut contributions: Vec<FeatureContribution> = self
            .vectorizer
            .schema()
            .iter()
            .zip(vector)
            .zip(importances)
            .map(|((feature, &value), &importance)| FeatureContribution {
                feature: feature.clone(),
                value,
                contribution: value * importance,
            })
            .collect();

        contributions.sort_by(|a, b| b.contribution.abs().total_cmp(&a.contribution.abs()));
        contributions.truncate(limit);
        contributions
    }

    pub fn feature_importance(&self) -> FeatureImportanceReport {
        let mut features: Vec<FeatureImportance> = match self.artifact.classifier.feature_importances() {
            Some(importances) => self
                .vectorizer
                .schema()
                .iter()
                .zip(importances)
                .map(|(feature, &importance)| FeatureImportance {
                    feature: feature.clone(),
                    importance,
                    rank: 0,
                })
                .collect(),
            None => Vec::new(),
        };

        features.sort_by(|a, b| b.importance.total_cmp(&a.importance));
        for (i, feature) in features.iter_mut().enumerate() {
            feature.rank = i + 1;
        }

        FeatureImportanceReport {
            model_version: self.version_id().clone(),
            features,
        }
    }
}

/// Serves predictions from the active (or a pinned) version of a tenant.
///
/// Decoded versions are cached by (tenant, version); versions are immutable,
/// so a cache entry never goes stale, and a pointer change is picked up on
/// the next request because the active id is resolved every time.
pub struct PredictionEngine {
    registry: Arc<ModelRegistry>,
    cache: AppCache<(String, VersionId), Arc<ServingModel>>,
    config: PredictionConfig,
    events: Arc<dyn EventSink>,
}

impl PredictionEngine {
    pub fn new(
        registry: Arc<ModelRegistry>,
        config: PredictionConfig,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let cache = AppCache::new(
            config.cache_capacity,
            Duration::from_secs(config.cache_idle_secs),
        );

        Self {
            registry,
            cache,
            config,
            events,
        }
    }

    /// Resolve and decode the version serving `tenant`
    pub async fn serving_model(
        &self,
        tenant: &TenantId,
        version: Option<&str>,
    ) -> Result<Arc<ServingModel>> {
        let version_id = self.registry.resolve_version(tenant, version).await?;
        let key = (tenant.as_str().to_string(), version_id.clone());

        if let Some(model) = self.cache.get(&key).await {
            return Ok(model);
        }

        let artifact = self.registry.load_resolved(tenant, &version_id).await?;
        let metadata = self.registry.load_metadata_resolved(tenant, &version_id).await?;
        if metadata.is_placeholder() {
            tracing::warn!(
                tenant_id = %tenant,
                version_id = %version_id,
                "Serving version without metadata, using the artifact feature layout"
            );
        }

        let model = Arc::new(ServingModel::new(metadata, artifact));
        self.cache.insert(key, model.clone()).await;
        tracing::debug!(tenant_id = %tenant, version_id = %version_id, "Serving model loaded");

        Ok(model)
    }

    /// Predict with the tenant's active version
    pub async fn predict(&self, tenant: &TenantId, features: &FeatureMap) -> Result<PredictionResult> {
        self.predict_with_version(tenant, None, features).await
    }

    /// Predict with an explicit version, or the active one when `None`
    pub async fn predict_with_version(
        &self,
        tenant: &TenantId,
        version: Option<&str>,
        features: &FeatureMap,
    ) -> Result<PredictionResult> {
        let result = match self.serving_model(tenant, version).await {
            Ok(model) => model.predict(features, self.config.top_contributions),
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            self.report_failure(tenant, e);
        }
        result
    }

    /// Score every item independently. The response always has one entry
    /// per request, failed items carrying an embedded error.
    pub async fn predict_batch(
        &self,
        tenant: &TenantId,
        items: &[FeatureMap],
    ) -> Result<Vec<BatchPredictionItem>> {
        if items.len() > self.config.max_batch_size {
            return Err(AppError::Validation(format!(
                "batch of {} exceeds the limit of {}",
                items.len(),
                self.config.max_batch_size
            )));
        }

        let model = self.serving_model(tenant, None).await;
        let results: Vec<BatchPredictionItem> = items
            .iter()
            .map(|features| {
                let outcome = match &model {
                    Ok(model) => model.predict(features, self.config.top_contributions),
                    Err(e) => Err(e.clone()),
                };
                match outcome {
                    Ok(prediction) => BatchPredictionItem::Prediction(prediction),
                    Err(e) => {
                        self.report_failure(tenant, &e);
                        BatchPredictionItem::Error(BatchItemError {
                            error: e.to_string(),
                            error_code: e.error_code().to_string(),
                            features: features.clone(),
                        })
                    }
                }
            })
            .collect();

        let failed = results.iter().filter(|r| r.is_error()).count();
        tracing::info!(
            tenant_id = %tenant,
            total = results.len(),
            failed,
            "Batch prediction completed"
        );
        Ok(results)
    }

    /// Ranked importances of the active version
    pub async fn feature_importance(&self, tenant: &TenantId) -> Result<FeatureImportanceReport> {
        Ok(self.serving_model(tenant, None).await?.feature_importance())
    }

    fn report_failure(&self, tenant: &TenantId, error: &AppError) {
        if error.is_client_error() {
            tracing::debug!(tenant_id = %tenant, error = %error, "Prediction rejected");
        } else {
            tracing::warn!(tenant_id = %tenant, error = %error, "Prediction failed");
        }
        self.events.emit(LifecycleEvent::PredictionFailed {
            tenant_id: tenant.to_string(),
            error_code: error.error_code().to_string(),
        });
    }
}
