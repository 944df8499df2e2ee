use crate::error::{AppError, Result};
use crate::ml::features::{coerce_value, vectorize_imputed, FeatureMap};
use chrono::{DateTime, Utc};
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

const ENGAGEMENT_RATE: &str = "engagement_rate";
const INBOUND: &str = "inbound_messages_count";
const OUTBOUND: &str = "outbound_messages_count";

/// One labelled row as delivered by a training data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRow {
    /// Conversion outcome; accepts `true`/`false` or `1`/`0`
    #[serde(alias = "conversion_label", deserialize_with = "deserialize_label")]
    pub converted: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    /// Feature columns
    #[serde(flatten)]
    pub columns: FeatureMap,
}

impl TrainingRow {
    pub fn new(converted: bool, columns: FeatureMap) -> Self {
        Self {
            converted,
            tenant_id: None,
            created_at: None,
            columns,
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Fill `engagement_rate` from the message counts when the row lacks it
    fn derived_columns(&self) -> FeatureMap {
        let mut columns = self.columns.clone();
        let missing = columns
            .get(ENGAGEMENT_RATE)
            .map_or(true, |v| matches!(coerce_value(ENGAGEMENT_RATE, v), Ok(None)));

        if missing {
            let count = |name: &str| {
                columns
                    .get(name)
                    .and_then(|v| coerce_value(name, v).ok().flatten())
                    .unwrap_or(0.0)
            };
            let rate = count(INBOUND) / (count(OUTBOUND) + 1.0);
            if let Some(rate) = serde_json::Number::from_f64(rate) {
                columns.insert(ENGAGEMENT_RATE.to_string(), Value::Number(rate));
            }
        }
        columns
    }
}

fn deserialize_label<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::Number(n) if n.as_f64() == Some(1.0) => Ok(true),
        Value::Number(n) if n.as_f64() == Some(0.0) => Ok(false),
        Value::String(s) if matches!(s.as_str(), "1" | "true") => Ok(true),
        Value::String(s) if matches!(s.as_str(), "0" | "false") => Ok(false),
        other => Err(D::Error::custom(format!(
            "invalid conversion label {}",
            other
        ))),
    }
}

/// Feature matrix plus binary labels (1 = converted)
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingDataset {
    pub features: Array2<f64>,
    pub labels: Vec<usize>,
    pub feature_names: Vec<String>,
}

impl TrainingDataset {
    pub fn new(features: Array2<f64>, labels: Vec<usize>, feature_names: Vec<String>) -> Self {
        Self {
            features,
            labels,
            feature_names,
        }
    }

    /// Build the matrix for `feature_names` from raw rows.
    ///
    /// Malformed cells are imputed with the feature default and reported in
    /// one warning rather than failing the run.
    pub fn from_rows(rows: &[TrainingRow], feature_names: &[String]) -> Result<Self> {
        if feature_names.is_empty() {
            return Err(AppError::Training("No feature columns configured".to_string()));
        }

        let mut data = Vec::with_capacity(rows.len() * feature_names.len());
        let mut labels = Vec::with_capacity(rows.len());
        let mut imputed_cells = 0;

        for row in rows {
            let (vector, imputed) = vectorize_imputed(&row.derived_columns(), feature_names);
            imputed_cells += imputed;
            data.extend(vector);
            labels.push(usize::from(row.converted));
        }

        if imputed_cells > 0 {
            tracing::warn!(
                imputed_cells,
                rows = rows.len(),
                "Imputed malformed training cells with feature defaults"
            );
        }

        let features = Array2::from_shape_vec((rows.len(), feature_names.len()), data)
            .map_err(|e| AppError::Internal(format!("Failed to shape feature matrix: {}", e)))?;

        Ok(Self::new(features, labels, feature_names.to_vec()))
    }

    pub fn n_samples(&self) -> usize {
        self.labels.len()
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Number of (negative, positive) rows
    pub fn class_counts(&self) -> (usize, usize) {
        let positives = self.labels.iter().filter(|&&l| l == 1).count();
        (self.labels.len() - positives, positives)
    }

    /// Subset of rows, in the given order
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            features: self.features.select(Axis(0), indices),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
            feature_names: self.feature_names.clone(),
        }
    }

    /// Split into (train, test) keeping the class balance in both partitions.
    ///
    /// Each class contributes `round(count * test_fraction)` rows to the test
    /// side, but at least one and never all of them.
    pub fn stratified_split(&self, test_fraction: f64, seed: u64) -> Result<(Self, Self)> {
        if !(0.0..1.0).contains(&test_fraction) || test_fraction == 0.0 {
            return Err(AppError::Validation(format!(
                "test fraction must be in (0, 1), got {}",
                test_fraction
            )));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut train = Vec::new();
        let mut test = Vec::new();

        for class in [0usize, 1] {
            let mut members: Vec<usize> = self
                .labels
                .iter()
                .enumerate()
                .filter(|(_, &label)| label == class)
                .map(|(i, _)| i)
                .collect();

            if members.len() < 2 {
                return Err(AppError::Training(format!(
                    "Need at least 2 rows of class {} for a stratified split, got {}",
                    class,
                    members.len()
                )));
            }

            members.shuffle(&mut rng);
            let n_test = ((members.len() as f64 * test_fraction).round() as usize)
                .clamp(1, members.len() - 1);
            test.extend_from_slice(&members[..n_test]);
            train.extend_from_slice(&members[n_test..]);
        }

        train.sort_unstable();
        test.sort_unstable();
        Ok((self.select(&train), self.select(&test)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(converted: bool, columns: Value) -> TrainingRow {
        TrainingRow::new(converted, serde_json::from_value(columns).unwrap())
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_row_deserialization_accepts_numeric_labels() {
        let row: TrainingRow = serde_json::from_value(json!({
            "converted": 1,
            "tenant_id": "acme",
            "lead_source_score": 42
        }))
        .unwrap();

        assert!(row.converted);
        assert_eq!(row.tenant_id.as_deref(), Some("acme"));
        assert_eq!(row.columns.get("lead_source_score"), Some(&json!(42)));
        assert!(!row.columns.contains_key("tenant_id"));

        let legacy: TrainingRow =
            serde_json::from_value(json!({"conversion_label": false})).unwrap();
        assert!(!legacy.converted);

        assert!(serde_json::from_value::<TrainingRow>(json!({"converted": 2})).is_err());
    }

    #[test]
    fn test_engagement_rate_is_derived() {
        let rows = vec![
            row(true, json!({"inbound_messages_count": 6, "outbound_messages_count": 2})),
            row(false, json!({"engagement_rate": 0.25, "inbound_messages_count": 9})),
        ];
        let dataset = TrainingDataset::from_rows(&rows, &names(&["engagement_rate"])).unwrap();

        assert_eq!(dataset.features[[0, 0]], 2.0);
        assert_eq!(dataset.features[[1, 0]], 0.25);
        assert_eq!(dataset.labels, vec![1, 0]);
    }

    #[test]
    fn test_malformed_cells_are_imputed() {
        let rows = vec![row(false, json!({"response_time_minutes": "soon"}))];
        let dataset =
            TrainingDataset::from_rows(&rows, &names(&["response_time_minutes"])).unwrap();

        assert_eq!(dataset.features[[0, 0]], 120.0);
    }

    #[test]
    fn test_stratified_split_preserves_balance() {
        let rows: Vec<TrainingRow> = (0..100)
            .map(|i| row(i % 4 == 0, json!({"lead_source_score": i})))
            .collect();
        let dataset = TrainingDataset::from_rows(&rows, &names(&["lead_source_score"])).unwrap();
        assert_eq!(dataset.class_counts(), (75, 25));

        let (train, test) = dataset.stratified_split(0.2, 42).unwrap();

        assert_eq!(test.n_samples(), 20);
        assert_eq!(train.n_samples(), 80);
        assert_eq!(test.class_counts(), (15, 5));
        assert_eq!(train.class_counts(), (60, 20));
    }

    #[test]
    fn test_split_is_reproducible() {
        let rows: Vec<TrainingRow> = (0..30)
            .map(|i| row(i % 2 == 0, json!({"lead_source_score": i})))
            .collect();
        let dataset = TrainingDataset::from_rows(&rows, &names(&["lead_source_score"])).unwrap();

        let (_, a) = dataset.stratified_split(0.2, 1).unwrap();
        let (_, b) = dataset.stratified_split(0.2, 1).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_split_requires_both_classes() {
        let rows: Vec<TrainingRow> = (0..10).map(|_| row(true, json!({}))).collect();
        let dataset = TrainingDataset::from_rows(&rows, &names(&["lead_source_score"])).unwrap();

        assert!(matches!(
            dataset.stratified_split(0.2, 42),
            Err(AppError::Training(_))
        ));
    }
}
