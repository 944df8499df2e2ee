/// Machine learning side of the lifecycle manager
///
/// - Feature catalog and per-version vectorization
/// - Training rows, imputation and stratified splitting
/// - Bagged decision tree classifier with permutation importances
/// - Training pipeline publishing into the model registry
/// - Prediction engine serving the active or a pinned version

pub mod classifier;
pub mod dataset;
pub mod evaluation;
pub mod features;
pub mod models;
pub mod prediction;
pub mod service;
pub mod training;

pub use classifier::{BaggedTreeClassifier, Classifier, ModelArtifact};
pub use dataset::{TrainingDataset, TrainingRow};
pub use features::{default_feature_names, vectorize, FeatureMap, FeatureVectorizer};
pub use models::{
    BatchPredictionItem, ConfusionMatrix, FeatureContribution, FeatureImportanceReport,
    Hyperparameters, ModelInfo, ModelMetrics, ModelType, ModelVersion, NewVersion,
    PredictionResult, RecommendedAction, TrainingResult, VersionSummary,
};
pub use prediction::PredictionEngine;
pub use service::LeadScoringService;
pub use training::{
    InMemoryDataSource, JsonFileDataSource, TrainingDataSource, TrainingPipeline, TrainingWindow,
};
