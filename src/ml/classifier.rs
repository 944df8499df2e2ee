use crate::error::{AppError, Result};
use crate::ml::dataset::TrainingDataset;
use crate::ml::models::{Hyperparameters, ModelType};
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::tree::decision_tree_classifier::{
    DecisionTreeClassifier, DecisionTreeClassifierParameters, SplitCriterion,
};

type Tree = DecisionTreeClassifier<f64, i32, DenseMatrix<f64>, Vec<i32>>;

/// Trait for binary classifiers
pub trait Classifier: Send + Sync {
    /// Fit the classifier on a labelled dataset
    fn train(&mut self, dataset: &TrainingDataset) -> Result<()>;

    /// Probability of the positive class, one per row
    fn predict_proba(&self, features: &Array2<f64>) -> Result<Vec<f64>>;

    /// Predict class labels (1 when the positive probability exceeds 0.5)
    fn predict(&self, features: &Array2<f64>) -> Result<Vec<usize>> {
        Ok(self
            .predict_proba(features)?
            .into_iter()
            .map(|p| usize::from(p > 0.5))
            .collect())
    }

    /// Per-feature importance scores, in feature order, if the model has any
    fn feature_importances(&self) -> Option<&[f64]>;

    /// Get model type
    fn model_type(&self) -> ModelType;

    /// Check if model is trained
    fn is_trained(&self) -> bool;
}

/// Bootstrap-aggregated ensemble of CART trees.
///
/// Every tree is fitted on a bootstrap sample drawn per class, so both
/// classes are present in each sample. The positive-class probability is the
/// fraction of trees voting for it.
#[derive(Serialize, Deserialize)]
pub struct BaggedTreeClassifier {
    hyperparameters: Hyperparameters,
    trees: Vec<Tree>,
    n_features: usize,
    importances: Option<Vec<f64>>,
}

impl BaggedTreeClassifier {
    pub fn new(hyperparameters: Hyperparameters) -> Self {
        Self {
            hyperparameters,
            trees: Vec::new(),
            n_features: 0,
            importances: None,
        }
    }

    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyperparameters
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    fn tree_parameters(&self) -> DecisionTreeClassifierParameters {
        DecisionTreeClassifierParameters::default()
            .with_criterion(SplitCriterion::Gini)
            .with_max_depth(self.hyperparameters.max_depth)
            .with_min_samples_split(self.hyperparameters.min_samples_split)
            .with_min_samples_leaf(self.hyperparameters.min_samples_leaf)
    }

    fn ndarray_to_densematrix(arr: &Array2<f64>) -> DenseMatrix<f64> {
        let shape = arr.shape();
        let data: Vec<f64> = arr.iter().copied().collect();
        DenseMatrix::new(shape[0], shape[1], data, false)
    }

    /// Row indices of one bootstrap sample, drawn with replacement per class
    fn stratified_bootstrap(by_class: &[Vec<usize>], rng: &mut StdRng) -> Vec<usize> {
        let mut sample = Vec::with_capacity(by_class.iter().map(Vec::len).sum());
        for members in by_class {
            for _ in 0..members.len() {
                sample.push(members[rng.gen_range(0..members.len())]);
            }
        }
        sample
    }

    /// Permutation importance: mean accuracy drop when one column of the
    /// held-out matrix is shuffled, clipped at zero and normalised to sum 1.
    pub fn compute_permutation_importance(
        &mut self,
        holdout: &TrainingDataset,
        repeats: usize,
    ) -> Result<Vec<f64>> {
        if holdout.n_samples() == 0 {
            return Err(AppError::Training(
                "Cannot compute importances on an empty partition".to_string(),
            ));
        }

        let baseline = accuracy(&self.predict(&holdout.features)?, &holdout.labels);
        let repeats = repeats.max(1);
        let mut rng = StdRng::seed_from_u64(self.hyperparameters.seed);
        let mut raw = Vec::with_capacity(holdout.n_features());

        for column in 0..holdout.n_features() {
            let mut total_drop = 0.0;
            for _ in 0..repeats {
                let mut permuted = holdout.features.clone();
                let mut values: Vec<f64> = permuted.column(column).to_vec();
                values.shuffle(&mut rng);
                for (cell, value) in permuted.column_mut(column).iter_mut().zip(values) {
                    *cell = value;
                }

                let score = accuracy(&self.predict(&permuted)?, &holdout.labels);
                total_drop += baseline - score;
            }
            raw.push((total_drop / repeats as f64).max(0.0));
        }

        let sum: f64 = raw.iter().sum();
        let importances: Vec<f64> = if sum > 0.0 {
            raw.iter().map(|v| v / sum).collect()
        } else {
            raw
        };

        self.importances = Some(importances.clone());
        Ok(importances)
    }
}

impl Classifier for BaggedTreeClassifier {
    fn train(&mut self, dataset: &TrainingDataset) -> Result<()> {
        if dataset.n_samples() == 0 {
            return Err(AppError::Training("Training set is empty".to_string()));
        }

        let mut by_class: Vec<Vec<usize>> = vec![Vec::new(), Vec::new()];
        for (i, &label) in dataset.labels.iter().enumerate() {
            match by_class.get_mut(label) {
                Some(members) => members.push(i),
                None => {
                    return Err(AppError::Training(format!(
                        "Label {} is not binary",
                        label
                    )))
                }
            }
        }
        if by_class.iter().any(Vec::is_empty) {
            return Err(AppError::Training(
                "Training set must contain both classes".to_string(),
            ));
        }

        let params = self.tree_parameters();
        let seed = self.hyperparameters.seed;

        let trees = (0..self.hyperparameters.n_estimators.max(1))
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
                let sample = Self::stratified_bootstrap(&by_class, &mut rng);

                let x = Self::ndarray_to_densematrix(&dataset.features.select(Axis(0), &sample));
                let y: Vec<i32> = sample.iter().map(|&r| dataset.labels[r] as i32).collect();

                DecisionTreeClassifier::fit(&x, &y, params.clone()).map_err(|e| {
                    AppError::Training(format!("Failed to fit tree {}: {}", i, e))
                })
            })
            .collect::<Result<Vec<Tree>>>()?;

        tracing::debug!(
            trees = trees.len(),
            samples = dataset.n_samples(),
            features = dataset.n_features(),
            "Bagged tree ensemble fitted"
        );

        self.trees = trees;
        self.n_features = dataset.n_features();
        self.importances = None;
        Ok(())
    }

    fn predict_proba(&self, features: &Array2<f64>) -> Result<Vec<f64>> {
        if !self.is_trained() {
            return Err(AppError::Internal("Model not trained".to_string()));
        }
        if features.ncols() != self.n_features {
            return Err(AppError::Validation(format!(
                "Expected {} features, got {}",
                self.n_features,
                features.ncols()
            )));
        }

        let x = Self::ndarray_to_densematrix(features);
        let mut votes = vec![0usize; features.nrows()];

        for tree in &self.trees {
            let predictions = tree
                .predict(&x)
                .map_err(|e| AppError::Internal(format!("Prediction failed: {}", e)))?;
            for (count, label) in votes.iter_mut().zip(predictions) {
                if label == 1 {
                    *count += 1;
                }
            }
        }

        let n_trees = self.trees.len() as f64;
        Ok(votes.into_iter().map(|v| v as f64 / n_trees).collect())
    }

    fn feature_importances(&self) -> Option<&[f64]> {
        self.importances.as_deref()
    }

    fn model_type(&self) -> ModelType {
        ModelType::BaggedTrees
    }

    fn is_trained(&self) -> bool {
        !self.trees.is_empty()
    }
}

pub(crate) fn accuracy(predicted: &[usize], actual: &[usize]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let correct = predicted
        .iter()
        .zip(actual)
        .filter(|(p, a)| p == a)
        .count();
    correct as f64 / actual.len() as f64
}

/// Serialized form of one trained version: the fitted ensemble plus the
/// feature layout it was trained on.
#[derive(Serialize, Deserialize)]
pub struct ModelArtifact {
    pub feature_names: Vec<String>,
    pub classifier: BaggedTreeClassifier,
}

impl ModelArtifact {
    pub fn new(feature_names: Vec<String>, classifier: BaggedTreeClassifier) -> Self {
        Self {
            feature_names,
            classifier,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let artifact: Self = bincode::deserialize(bytes)?;
        if !artifact.classifier.is_trained() {
            return Err(AppError::Serialization(
                "Artifact contains an untrained classifier".to_string(),
            ));
        }
        Ok(artifact)
    }
}

impl std::fmt::Debug for ModelArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelArtifact")
            .field("feature_names", &self.feature_names)
            .field("trees", &self.classifier.n_trees())
            .field("has_importances", &self.classifier.importances.is_some())
            .finish()
    }
}
