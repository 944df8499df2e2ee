use crate::ml::features::FeatureMap;
use crate::registry::VersionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Binary confusion matrix on the held-out partition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_negatives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub true_positives: usize,
}

impl ConfusionMatrix {
    pub fn total(&self) -> usize {
        self.true_negatives + self.false_positives + self.false_negatives + self.true_positives
    }
}

/// Model evaluation metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    /// Precision on the positive (converted) class
    pub precision: f64,

    /// Recall on the positive class
    pub recall: f64,

    /// F1 score on the positive class
    pub f1_score: f64,

    /// Area under the ROC curve of the positive-class probability
    pub roc_auc: f64,

    /// Accuracy
    pub accuracy: f64,

    /// Confusion matrix
    pub confusion_matrix: ConfusionMatrix,
}

/// Ensemble hyper-parameters recorded with each version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub n_estimators: usize,
    pub max_depth: u16,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 10,
            min_samples_split: 10,
            min_samples_leaf: 5,
            seed: 42,
        }
    }
}

/// Model type enumeration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// Bootstrap-aggregated CART trees
    #[default]
    BaggedTrees,
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelType::BaggedTrees => write!(f, "Bagged Decision Trees"),
        }
    }
}

/// Metadata document stored next to every artifact.
///
/// Every field but the ids tolerates absence so that documents written by
/// older versions still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub tenant_id: String,

    pub version_id: VersionId,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub model_type: ModelType,

    #[serde(default)]
    pub metrics: ModelMetrics,

    /// Ordered feature layout of this version's vectors
    #[serde(default)]
    pub feature_names: Vec<String>,

    #[serde(default)]
    pub training_data_size: usize,

    #[serde(default)]
    pub test_size: usize,

    #[serde(default)]
    pub hyperparameters: Hyperparameters,
}

impl ModelVersion {
    /// Stand-in for a version whose metadata document is missing
    pub fn placeholder(tenant_id: &str, version_id: VersionId) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            version_id,
            created_at: None,
            model_type: ModelType::default(),
            metrics: ModelMetrics::default(),
            feature_names: Vec::new(),
            training_data_size: 0,
            test_size: 0,
            hyperparameters: Hyperparameters::default(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.created_at.is_none() && self.feature_names.is_empty()
    }
}

/// Everything about a new version except the ids the registry assigns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewVersion {
    pub model_type: ModelType,
    pub metrics: ModelMetrics,
    pub feature_names: Vec<String>,
    pub training_data_size: usize,
    pub test_size: usize,
    pub hyperparameters: Hyperparameters,
}

impl NewVersion {
    pub fn into_version(
        self,
        tenant_id: &str,
        version_id: VersionId,
        created_at: DateTime<Utc>,
    ) -> ModelVersion {
        ModelVersion {
            tenant_id: tenant_id.to_string(),
            version_id,
            created_at: Some(created_at),
            model_type: self.model_type,
            metrics: self.metrics,
            feature_names: self.feature_names,
            training_data_size: self.training_data_size,
            test_size: self.test_size,
            hyperparameters: self.hyperparameters,
        }
    }
}

/// One entry of a tenant's version history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionSummary {
    pub version_id: VersionId,
    pub is_active: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub metrics: ModelMetrics,
}

/// Description of the version currently serving a tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub tenant_id: String,
    pub version_id: VersionId,
    pub activated_at: DateTime<Utc>,
    pub is_rollback: bool,
    pub model_type: ModelType,
    pub metrics: ModelMetrics,
    pub feature_names: Vec<String>,
    pub training_data_size: usize,
}

/// Follow-up recommendation derived from a prediction
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendedAction {
    HighPriority,
    MediumPriority,
    Nurture,
    LowPriority,
}

impl RecommendedAction {
    /// Fixed decision table over conversion probability and confidence
    pub fn from_scores(probability: f64, confidence: f64) -> Self {
        if probability >= 0.70 && confidence >= 0.80 {
            RecommendedAction::HighPriority
        } else if probability >= 0.50 && confidence >= 0.70 {
            RecommendedAction::MediumPriority
        } else if probability >= 0.30 {
            RecommendedAction::Nurture
        } else {
            RecommendedAction::LowPriority
        }
    }
}

/// Signed contribution of one feature to a prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature: String,
    pub value: f64,
    pub contribution: f64,
}

/// Prediction result for one lead
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Predicted class (1 = converts)
    pub prediction: u8,

    /// Probability mass on the positive class
    pub conversion_probability: f64,

    /// Maximum class probability
    pub confidence: f64,

    pub model_version: VersionId,

    pub recommended_action: RecommendedAction,

    pub feature_contributions: Vec<FeatureContribution>,
}

/// Failure captured for one item of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemError {
    pub error: String,
    pub error_code: String,
    pub features: FeatureMap,
}

/// One entry of a batch response, in request order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchPredictionItem {
    Prediction(PredictionResult),
    Error(BatchItemError),
}

impl BatchPredictionItem {
    pub fn is_error(&self) -> bool {
        matches!(self, BatchPredictionItem::Error(_))
    }

    pub fn prediction(&self) -> Option<&PredictionResult> {
        match self {
            BatchPredictionItem::Prediction(p) => Some(p),
            BatchPredictionItem::Error(_) => None,
        }
    }
}

/// Ranked importance of one feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportanceReport {
    pub model_version: VersionId,

    /// Descending by importance; empty when the model exposes none
    pub features: Vec<FeatureImportance>,
}

/// Outcome of a training run. Training never returns an error to the caller;
/// every failure mode is folded into this discriminated result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrainingResult {
    Success {
        tenant_id: String,
        version_id: VersionId,
        metrics: ModelMetrics,
        training_data_size: usize,
        test_size: usize,
    },
    InsufficientData {
        tenant_id: String,
        rows: usize,
        required: usize,
        message: String,
    },
    Error {
        tenant_id: String,
        error: String,
        error_code: String,
    },
}

impl TrainingResult {
    pub fn status(&self) -> &'static str {
        match self {
            TrainingResult::Success { .. } => "success",
            TrainingResult::InsufficientData { .. } => "insufficient_data",
            TrainingResult::Error { .. } => "error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TrainingResult::Success { .. })
    }

    pub fn version_id(&self) -> Option<&VersionId> {
        match self {
            TrainingResult::Success { version_id, .. } => Some(version_id),
            _ => None,
        }
    }

    pub fn metrics(&self) -> Option<&ModelMetrics> {
        match self {
            TrainingResult::Success { metrics, .. } => Some(metrics),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_recommended_action_thresholds() {
        assert_eq!(
            RecommendedAction::from_scores(0.85, 0.85),
            RecommendedAction::HighPriority
        );
        // High probability but low confidence falls through
        assert_eq!(
            RecommendedAction::from_scores(0.75, 0.75),
            RecommendedAction::MediumPriority
        );
        assert_eq!(
            RecommendedAction::from_scores(0.55, 0.65),
            RecommendedAction::Nurture
        );
        assert_eq!(
            RecommendedAction::from_scores(0.30, 0.70),
            RecommendedAction::Nurture
        );
        assert_eq!(
            RecommendedAction::from_scores(0.29, 0.71),
            RecommendedAction::LowPriority
        );
    }

    #[test]
    fn test_recommended_action_strings() {
        assert_eq!(RecommendedAction::HighPriority.to_string(), "HIGH_PRIORITY");
        assert_eq!(
            RecommendedAction::from_str("LOW_PRIORITY").unwrap(),
            RecommendedAction::LowPriority
        );
        assert_eq!(
            serde_json::to_value(RecommendedAction::MediumPriority).unwrap(),
            "MEDIUM_PRIORITY"
        );
    }

    #[test]
    fn test_training_result_status_tag() {
        let result = TrainingResult::InsufficientData {
            tenant_id: "acme".to_string(),
            rows: 50,
            required: 100,
            message: "Need at least 100 records, got 50".to_string(),
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "insufficient_data");
        assert_eq!(result.status(), "insufficient_data");
        assert!(result.version_id().is_none());
    }

    #[test]
    fn test_metadata_tolerates_missing_fields() {
        let json = r#"{"tenant_id":"acme","version_id":"20240101000000000000"}"#;
        let version: ModelVersion = serde_json::from_str(json).unwrap();

        assert!(version.feature_names.is_empty());
        assert_eq!(version.hyperparameters, Hyperparameters::default());
        assert_eq!(version.model_type, ModelType::BaggedTrees);
    }

    #[test]
    fn test_model_type_display() {
        assert_eq!(ModelType::BaggedTrees.to_string(), "Bagged Decision Trees");
    }
}
