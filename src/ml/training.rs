use crate::config::TrainingConfig;
use crate::error::{AppError, Result};
use crate::events::{EventSink, LifecycleEvent};
use crate::ml::classifier::{BaggedTreeClassifier, Classifier, ModelArtifact};
use crate::ml::dataset::{TrainingDataset, TrainingRow};
use crate::ml::evaluation::evaluate;
use crate::ml::models::{NewVersion, TrainingResult};
use crate::registry::ModelRegistry;
use crate::tenant::TenantId;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Time range of rows considered for a training run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TrainingWindow {
    /// The last `days` days up to now
    pub fn trailing(days: i64) -> Result<Self> {
        let end = Utc::now();
        let start = Duration::try_days(days)
            .filter(|span| *span > Duration::zero())
            .and_then(|span| end.checked_sub_signed(span))
            .ok_or_else(|| {
                AppError::Validation(format!("training window of {} days is out of range", days))
            })?;

        Ok(Self { start, end })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// Supplier of labelled rows for a tenant
#[async_trait]
pub trait TrainingDataSource: Send + Sync {
    async fn fetch_training_rows(
        &self,
        tenant: &TenantId,
        window: TrainingWindow,
    ) -> Result<Vec<TrainingRow>>;
}

/// Rows without a tenant belong to every tenant; rows without a timestamp
/// fall inside every window.
fn row_matches(row: &TrainingRow, tenant: &TenantId, window: &TrainingWindow) -> bool {
    row.tenant_id.as_deref().map_or(true, |t| t == tenant.as_str())
        && row.created_at.map_or(true, |at| window.contains(at))
}

/// In-memory data source (for testing and embedding)
#[derive(Clone, Default)]
pub struct InMemoryDataSource {
    rows: Arc<RwLock<Vec<TrainingRow>>>,
    failure: Arc<RwLock<Option<String>>>,
}

impl InMemoryDataSource {
    pub fn new(rows: Vec<TrainingRow>) -> Self {
        Self {
            rows: Arc::new(RwLock::new(rows)),
            failure: Arc::default(),
        }
    }

    pub fn extend(&self, rows: impl IntoIterator<Item = TrainingRow>) {
        self.rows.write().extend(rows);
    }

    pub fn clear(&self) {
        self.rows.write().clear();
    }

    /// Make every fetch fail with a data source error until cleared
    pub fn fail_with(&self, message: Option<String>) {
        *self.failure.write() = message;
    }
}

#[async_trait]
impl TrainingDataSource for InMemoryDataSource {
    async fn fetch_training_rows(
        &self,
        tenant: &TenantId,
        window: TrainingWindow,
    ) -> Result<Vec<TrainingRow>> {
        if let Some(message) = self.failure.read().clone() {
            return Err(AppError::DataSource(message));
        }

        Ok(self
            .rows
            .read()
            .iter()
            .filter(|row| row_matches(row, tenant, &window))
            .cloned()
            .collect())
    }
}

/// Reads a JSON array of rows from a file on every fetch
#[derive(Debug, Clone)]
pub struct JsonFileDataSource {
    path: PathBuf,
}

impl JsonFileDataSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TrainingDataSource for JsonFileDataSource {
    async fn fetch_training_rows(
        &self,
        tenant: &TenantId,
        window: TrainingWindow,
    ) -> Result<Vec<TrainingRow>> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            AppError::DataSource(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        let raw: Vec<serde_json::Value> = serde_json::from_slice(&bytes).map_err(|e| {
            AppError::DataSource(format!("Invalid rows in {}: {}", self.path.display(), e))
        })?;

        let mut skipped = 0usize;
        let rows: Vec<TrainingRow> = raw
            .into_iter()
            .enumerate()
            .filter_map(|(position, value)| match serde_json::from_value(value) {
                Ok(row) => Some(row),
                Err(e) => {
                    tracing::debug!(position, error = %e, "Skipping unparseable training row");
                    skipped += 1;
                    None
                }
            })
            .filter(|row| row_matches(row, tenant, &window))
            .collect();

        if skipped > 0 {
            tracing::warn!(
                path = %self.path.display(),
                skipped,
                "Skipped training rows with an unreadable label or timestamp"
            );
        }

        Ok(rows)
    }
}

/// A fitted, evaluated model ready for publication
struct FittedModel {
    artifact: ModelArtifact,
    new_version: NewVersion,
}

/// CPU-bound part of a run: build the matrix, split, fit, evaluate and score
/// importances.
fn fit_and_evaluate(rows: &[TrainingRow], config: &TrainingConfig) -> Result<FittedModel> {
    let dataset = TrainingDataset::from_rows(rows, &config.feature_columns)?;
    let (train, test) = dataset.stratified_split(config.test_fraction, config.seed)?;

    let mut classifier = BaggedTreeClassifier::new(config.hyperparameters());
    classifier.train(&train)?;

    let scores = classifier.predict_proba(&test.features)?;
    let predicted: Vec<usize> = scores.iter().map(|&p| usize::from(p > 0.5)).collect();
    let metrics = evaluate(&test.labels, &predicted, &scores);

    classifier.compute_permutation_importance(&test, config.importance_repeats)?;

    let new_version = NewVersion {
        model_type: classifier.model_type(),
        metrics,
        feature_names: dataset.feature_names.clone(),
        training_data_size: dataset.n_samples(),
        test_size: test.n_samples(),
        hyperparameters: config.hyperparameters(),
    };

    Ok(FittedModel {
        artifact: ModelArtifact::new(dataset.feature_names, classifier),
        new_version,
    })
}

fn ensure_not_cancelled(cancel: &CancellationToken, stage: &str) -> Result<()> {
    if cancel.is_cancelled() {
        Err(AppError::Cancelled(format!("training cancelled {}", stage)))
    } else {
        Ok(())
    }
}

/// Fetch, fit, evaluate and publish a new model version for a tenant.
///
/// No pointer lock is held until the final publish step inside the registry.
pub struct TrainingPipeline {
    config: TrainingConfig,
    source: Arc<dyn TrainingDataSource>,
    registry: Arc<ModelRegistry>,
    events: Arc<dyn EventSink>,
}

impl TrainingPipeline {
    pub fn new(
        config: TrainingConfig,
        source: Arc<dyn TrainingDataSource>,
        registry: Arc<ModelRegistry>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            source,
            registry,
            events,
        }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train a new version. Never fails: every outcome is a `TrainingResult`.
    pub async fn train(&self, tenant: &TenantId) -> TrainingResult {
        self.train_with_cancellation(tenant, CancellationToken::new())
            .await
    }

    /// Train, checking `cancel` between the fetch, fit and publish stages.
    /// A cancelled run reports `status: error` and never moves the pointer.
    pub async fn train_with_cancellation(
        &self,
        tenant: &TenantId,
        cancel: CancellationToken,
    ) -> TrainingResult {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("training_run", tenant_id = %tenant, run_id = %run_id);

        async {
            let started = Instant::now();
            tracing::info!("Training run started");

            let result = match self.run(tenant, &cancel).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(error = %e, error_code = e.error_code(), "Training run failed");
                    TrainingResult::Error {
                        tenant_id: tenant.to_string(),
                        error: e.to_string(),
                        error_code: e.error_code().to_string(),
                    }
                }
            };

            let duration_ms = started.elapsed().as_millis() as u64;
            tracing::info!(status = result.status(), duration_ms, "Training run finished");
            self.events.emit(LifecycleEvent::TrainingCompleted {
                tenant_id: tenant.to_string(),
                run_id: run_id.to_string(),
                status: result.status().to_string(),
                version_id: result.version_id().map(ToString::to_string),
                duration_ms,
            });

            result
        }
        .instrument(span)
        .await
    }

    async fn run(&self, tenant: &TenantId, cancel: &CancellationToken) -> Result<TrainingResult> {
        ensure_not_cancelled(cancel, "before fetch")?;

        let window = TrainingWindow::trailing(self.config.window_days)?;
        let rows = tokio::select! {
            rows = self.source.fetch_training_rows(tenant, window) => rows?,
            _ = cancel.cancelled() => {
                return Err(AppError::Cancelled("training cancelled during fetch".to_string()))
            }
        };
        tracing::info!(rows = rows.len(), "Fetched training rows");

        if rows.len() < self.config.min_training_rows {
            tracing::warn!(
                rows = rows.len(),
                required = self.config.min_training_rows,
                "Not enough training data"
            );
            return Ok(TrainingResult::InsufficientData {
                tenant_id: tenant.to_string(),
                rows: rows.len(),
                required: self.config.min_training_rows,
                message: format!(
                    "Need at least {} records, got {}",
                    self.config.min_training_rows,
                    rows.len()
                ),
            });
        }

        ensure_not_cancelled(cancel, "before fit")?;

        let config = self.config.clone();
        let fitted = tokio::task::spawn_blocking(move || fit_and_evaluate(&rows, &config))
            .await
            .map_err(|e| AppError::Internal(format!("Training task failed: {}", e)))??;

        ensure_not_cancelled(cancel, "before publish")?;

        let metrics = fitted.new_version.metrics.clone();
        let training_data_size = fitted.new_version.training_data_size;
        let test_size = fitted.new_version.test_size;
        let version_id = self
            .registry
            .save(tenant, &fitted.artifact, fitted.new_version)
            .await?;

        tracing::info!(
            version_id = %version_id,
            precision = metrics.precision,
            recall = metrics.recall,
            roc_auc = metrics.roc_auc,
            "Model trained"
        );

        Ok(TrainingResult::Success {
            tenant_id: tenant.to_string(),
            version_id,
            metrics,
            training_data_size,
            test_size,
        })
    }
}
