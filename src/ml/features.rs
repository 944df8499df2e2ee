use crate::error::{AppError, Result};
use serde_json::Value;
use std::collections::HashMap;

/// Named attribute bag of a prediction request or training row
pub type FeatureMap = HashMap<String, Value>;

/// A lead feature with the value used when a request omits it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureSpec {
    pub name: &'static str,
    pub default: f64,
    pub description: &'static str,
}

/// Feature catalog, in the default training layout
pub const LEAD_FEATURES: &[FeatureSpec] = &[
    FeatureSpec {
        name: "lead_source_score",
        default: 10.0,
        description: "Quality score of the acquisition channel",
    },
    FeatureSpec {
        name: "response_time_minutes",
        default: 120.0,
        description: "Minutes until the first agent response",
    },
    FeatureSpec {
        name: "inbound_messages_count",
        default: 0.0,
        description: "Messages received from the lead",
    },
    FeatureSpec {
        name: "outbound_messages_count",
        default: 0.0,
        description: "Messages sent to the lead",
    },
    FeatureSpec {
        name: "appointments_count",
        default: 0.0,
        description: "Appointments booked",
    },
    FeatureSpec {
        name: "has_property",
        default: 0.0,
        description: "Lead is attached to a listing (0/1)",
    },
    FeatureSpec {
        name: "property_price",
        default: 0.0,
        description: "Price of the attached listing",
    },
    FeatureSpec {
        name: "property_has_photos",
        default: 0.0,
        description: "Attached listing has photos (0/1)",
    },
    FeatureSpec {
        name: "engagement_rate",
        default: 0.0,
        description: "inbound / (outbound + 1)",
    },
    FeatureSpec {
        name: "days_since_creation",
        default: 0.0,
        description: "Age of the lead in days",
    },
    FeatureSpec {
        name: "market_activity_score",
        default: 50.0,
        description: "Local market activity index",
    },
];

/// Default training layout
pub fn default_feature_names() -> Vec<String> {
    LEAD_FEATURES.iter().map(|f| f.name.to_string()).collect()
}

/// Documented default for `name`; features outside the catalog default to 0.0
pub fn feature_default(name: &str) -> f64 {
    LEAD_FEATURES
        .iter()
        .find(|f| f.name == name)
        .map(|f| f.default)
        .unwrap_or(0.0)
}

/// Coerce one attribute value.
///
/// Returns `Ok(None)` for values that mean "absent" (null, blank string) so
/// the caller can substitute the default.
pub fn coerce_value(name: &str, value: &Value) -> Result<Option<f64>> {
    let parsed = match value {
        Value::Null => return Ok(None),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            match s.to_ascii_lowercase().as_str() {
                "true" => Some(1.0),
                "false" => Some(0.0),
                _ => s.parse::<f64>().ok(),
            }
        }
        Value::Array(_) | Value::Object(_) => None,
    };

    match parsed {
        Some(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(AppError::Validation(format!(
            "feature '{}' has non-numeric value {}",
            name, value
        ))),
    }
}

/// Map `features` onto `schema`, one float per schema entry in schema order.
///
/// Missing keys never fail; they take the feature default. A present value
/// that cannot be read as a number is a validation error.
pub fn vectorize(features: &FeatureMap, schema: &[String]) -> Result<Vec<f64>> {
    schema
        .iter()
        .map(|name| match features.get(name) {
            Some(value) => Ok(coerce_value(name, value)?.unwrap_or_else(|| feature_default(name))),
            None => Ok(feature_default(name)),
        })
        .collect()
}

/// Lenient variant used for training rows: malformed cells are imputed with
/// the default and counted.
pub fn vectorize_imputed(features: &FeatureMap, schema: &[String]) -> (Vec<f64>, usize) {
    let mut imputed = 0;
    let vector = schema
        .iter()
        .map(|name| {
            let value = features
                .get(name)
                .map(|v| coerce_value(name, v))
                .transpose();
            match value {
                Ok(Some(Some(v))) => v,
                Ok(_) => feature_default(name),
                Err(_) => {
                    imputed += 1;
                    feature_default(name)
                }
            }
        })
        .collect();
    (vector, imputed)
}

/// Vectorizer bound to one version's feature layout
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVectorizer {
    schema: Vec<String>,
}

impl FeatureVectorizer {
    pub fn new(schema: Vec<String>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &[String] {
        &self.schema
    }

    pub fn n_features(&self) -> usize {
        self.schema.len()
    }

    pub fn transform(&self, features: &FeatureMap) -> Result<Vec<f64>> {
        vectorize(features, &self.schema)
    }
}
