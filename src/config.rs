use crate::error::Result;
use crate::ml::features::default_feature_names;
use crate::ml::models::Hyperparameters;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use validator::Validate;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    /// Model registry persistence
    #[serde(default)]
    #[validate(nested)]
    pub registry: RegistryConfig,

    /// Training pipeline policy
    #[serde(default)]
    #[validate(nested)]
    pub training: TrainingConfig,

    /// Prediction engine settings
    #[serde(default)]
    #[validate(nested)]
    pub prediction: PredictionConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CONFIG_PATH").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load configuration, layering an optional file over the embedded defaults
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ));

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path.to_path_buf()).required(false));
        }

        let config: Config = builder
            // Override with environment variables (prefix: LEAD_MODELS)
            .add_source(
                config::Environment::with_prefix("LEAD_MODELS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegistryConfig {
    /// Persistence backend for artifacts, metadata and the pointer index
    #[serde(default)]
    pub backend: StoreBackend,

    /// Root directory (filesystem) or database path (sled)
    #[serde(default = "default_registry_root")]
    pub root: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            root: default_registry_root(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Filesystem,
    Sled,
    InMemory,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TrainingConfig {
    /// Below this many rows a run reports `insufficient_data`
    #[serde(default = "default_min_training_rows")]
    #[validate(range(min = 10))]
    pub min_training_rows: usize,

    /// Hold-out fraction for evaluation
    #[serde(default = "default_test_fraction")]
    #[validate(range(min = 0.05, max = 0.5))]
    pub test_fraction: f64,

    /// Trailing window of rows fetched from the data source (days)
    #[serde(default = "default_window_days")]
    #[validate(range(min = 1, max = 36500))]
    pub window_days: i64,

    /// Number of trees in the ensemble
    #[serde(default = "default_n_estimators")]
    #[validate(range(min = 1, max = 1000))]
    pub n_estimators: usize,

    /// Maximum tree depth
    #[serde(default = "default_max_depth")]
    #[validate(range(min = 1, max = 64))]
    pub max_depth: u16,

    /// Minimum samples required to split a node
    #[serde(default = "default_min_samples_split")]
    #[validate(range(min = 2))]
    pub min_samples_split: usize,

    /// Minimum samples in a leaf
    #[serde(default = "default_min_samples_leaf")]
    #[validate(range(min = 1))]
    pub min_samples_leaf: usize,

    /// Seed for splitting, bootstrapping and permutation importance
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Permutation rounds per feature when scoring importance
    #[serde(default = "default_importance_repeats")]
    #[validate(range(min = 1, max = 50))]
    pub importance_repeats: usize,

    /// Ordered feature columns; defines the vector layout of trained versions
    #[serde(default = "default_feature_names")]
    #[validate(length(min = 1))]
    pub feature_columns: Vec<String>,
}

impl TrainingConfig {
    pub fn hyperparameters(&self) -> Hyperparameters {
        Hyperparameters {
            n_estimators: self.n_estimators,
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
            seed: self.seed,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            min_training_rows: default_min_training_rows(),
            test_fraction: default_test_fraction(),
            window_days: default_window_days(),
            n_estimators: default_n_estimators(),
            max_depth: default_max_depth(),
            min_samples_split: default_min_samples_split(),
            min_samples_leaf: default_min_samples_leaf(),
            seed: default_seed(),
            importance_repeats: default_importance_repeats(),
            feature_columns: default_feature_names(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PredictionConfig {
    /// Serving models kept decoded in memory
    #[serde(default = "default_cache_capacity")]
    #[validate(range(min = 1))]
    pub cache_capacity: u64,

    /// Idle serving models are dropped after this long (seconds)
    #[serde(default = "default_cache_idle")]
    #[validate(range(min = 1))]
    pub cache_idle_secs: u64,

    /// Largest accepted batch
    #[serde(default = "default_max_batch_size")]
    #[validate(range(min = 1))]
    pub max_batch_size: usize,

    /// Feature contributions reported per prediction
    #[serde(default = "default_top_contributions")]
    pub top_contributions: usize,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            cache_idle_secs: default_cache_idle(),
            max_batch_size: default_max_batch_size(),
            top_contributions: default_top_contributions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

// Default value functions
fn default_registry_root() -> PathBuf {
    PathBuf::from("./models")
}

fn default_min_training_rows() -> usize {
    100
}

fn default_test_fraction() -> f64 {
    0.2
}

fn default_window_days() -> i64 {
    180 // six months
}

fn default_n_estimators() -> usize {
    100
}

fn default_max_depth() -> u16 {
    10
}

fn default_min_samples_split() -> usize {
    10
}

fn default_min_samples_leaf() -> usize {
    5
}

fn default_seed() -> u64 {
    42
}

fn default_importance_repeats() -> usize {
    5
}

fn default_cache_capacity() -> u64 {
    64
}

fn default_cache_idle() -> u64 {
    3600
}

fn default_max_batch_size() -> usize {
    1000
}

fn default_top_contributions() -> usize {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();
        assert_eq!(config.registry.backend, StoreBackend::Filesystem);
        assert_eq!(config.training.min_training_rows, 100);
        assert_eq!(config.training.test_fraction, 0.2);
        assert_eq!(config.training.feature_columns.len(), 11);
        assert_eq!(config.prediction.top_contributions, 5);
        assert_eq!(config.prediction.cache_idle_secs, 3600);
        assert_eq!(config.observability.log_level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_embedded_defaults_match_code_defaults() {
        let config = Config::load_from(None).unwrap();
        assert_eq!(config.training.n_estimators, 100);
        assert_eq!(config.training.window_days, 180);
        assert_eq!(config.registry.root, PathBuf::from("./models"));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[registry]\nbackend = \"sled\"\nroot = \"/tmp/models\"\n\n[training]\nn_estimators = 25"
        )
        .unwrap();

        let config = Config::load_from(Some(file.path())).unwrap();
        assert_eq!(config.registry.backend, StoreBackend::Sled);
        assert_eq!(config.training.n_estimators, 25);
        assert_eq!(config.training.max_depth, 10);
    }

    #[test]
    fn test_out_of_range_window_rejected() {
        let mut config = Config::default();
        config.training.window_days = 36_500;
        assert!(config.validate().is_ok());

        config.training.window_days = 100_000_000_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_test_fraction_rejected() {
        let mut config = Config::default();
        config.training.test_fraction = 0.9;
        assert!(config.validate().is_err());
    }
}
