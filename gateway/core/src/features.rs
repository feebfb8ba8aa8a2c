use indexmap::IndexMap;
use serde::Serialize;

/// Canonical feature order shared by the extractor, the training dataset,
/// and the model artifact.
pub const FEATURE_NAMES: [&str; 8] = [
    "failure_ratio",
    "failure_ratio_slope",
    "p95_latency",
    "latency_slope",
    "retry_rate",
    "timeout_rate",
    "error_burstiness",
    "circuit_flap_rate",
];

/// Ordered feature-name to value mapping.
///
/// The empty vector is the distinguished "insufficient data" value,
/// returned before any traffic has been observed; every consumer treats it
/// as no signal.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FeatureVector(IndexMap<String, f64>);

impl FeatureVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.0.iter().map(|(name, value)| (name.as_str(), *value))
    }
}
