use crate::features::FeatureVector;
use parking_lot::Mutex;
use serde::Deserialize;
use std::path::Path;

/// Serialized scoring artifact produced by the offline training job: a
/// logistic-regression weight vector plus the feature order it was trained
/// with.
#[derive(Clone, Debug, Deserialize)]
pub struct RiskModel {
    feature_names: Vec<String>,
    coefficients: Vec<f64>,
    intercept: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("failed to read model artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed model artifact: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("artifact declares {names} feature names but {coefficients} coefficients")]
    LengthMismatch { names: usize, coefficients: usize },
}

impl RiskModel {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelLoadError> {
        let raw = std::fs::read(path)?;
        let model: Self = serde_json::from_slice(&raw)?;
        if model.feature_names.len() != model.coefficients.len() {
            return Err(ModelLoadError::LengthMismatch {
                names: model.feature_names.len(),
                coefficients: model.coefficients.len(),
            });
        }
        Ok(model)
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn score(&self, row: &[f64]) -> f64 {
        let z = self.intercept
            + self
                .coefficients
                .iter()
                .zip(row)
                .map(|(weight, value)| weight * value)
                .sum::<f64>();
        1.0 / (1.0 + (-z).exp())
    }
}

/// Advisory failure-risk estimate.
///
/// Prediction never fails: an empty input, a missing model, or a
/// non-finite score all yield 0.0. The model stack must not be able to
/// take down the request path.
pub struct RiskPredictor {
    model: Option<Mutex<RiskModel>>,
}

impl RiskPredictor {
    pub fn new(model: Option<RiskModel>) -> Self {
        Self {
            model: model.map(Mutex::new),
        }
    }

    /// Loads the artifact at `path`, falling back to the no-model fail-safe
    /// when it cannot be used.
    pub fn from_artifact(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match RiskModel::load(path) {
            Ok(model) => {
                tracing::info!(
                    path = %path.display(),
                    features = model.feature_names.len(),
                    "Loaded risk model"
                );
                Self::new(Some(model))
            }
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    %error,
                    "Risk model unavailable, predictions disabled"
                );
                Self::new(None)
            }
        }
    }

    /// Probability of elevated failure in the next window, in [0, 1].
    ///
    /// The input is projected onto the artifact's feature order by name;
    /// missing names contribute 0.0 and extra names are ignored.
    pub fn predict_risk(&self, features: &FeatureVector) -> f64 {
        if features.is_empty() {
            return 0.0;
        }
        let Some(model) = &self.model else {
            return 0.0;
        };

        let model = model.lock();
        let row: Vec<f64> = model
            .feature_names
            .iter()
            .map(|name| features.get(name).unwrap_or(0.0))
            .collect();
        let risk = model.score(&row);
        if risk.is_finite() {
            risk.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}
