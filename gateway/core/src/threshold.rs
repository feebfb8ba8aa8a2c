use crate::features::FeatureVector;

/// Maps the current feature vector to the risk cutoff above which the
/// predictive controller intervenes.
#[derive(Copy, Clone, Debug)]
pub struct AdaptiveThresholds {
    pub base: f64,
    pub min: f64,
    pub max: f64,
}

impl Default for AdaptiveThresholds {
    fn default() -> Self {
        Self {
            base: 0.7,
            min: 0.4,
            max: 0.9,
        }
    }
}

impl AdaptiveThresholds {
    pub fn compute(&self, features: &FeatureVector) -> f64 {
        let mut threshold = self.base;
        if features.is_empty() {
            return threshold;
        }

        // High retry pressure: lower tolerance.
        if features.get("retry_rate").unwrap_or(0.0) > 0.3 {
            threshold -= 0.10;
        }

        // Latency rising: act earlier.
        if features.get("latency_slope").unwrap_or(0.0) > 0.0 {
            threshold -= 0.10;
        }

        // Circuit instability: defensive posture.
        if features.get("circuit_flap_rate").unwrap_or(0.0) > 0.0 {
            threshold -= 0.15;
        }

        // Fully stable: tolerate more risk before intervening.
        if features.get("failure_ratio").unwrap_or(0.0) == 0.0
            && features.get("latency_slope").unwrap_or(0.0) <= 0.0
        {
            threshold += 0.10;
        }

        ((threshold * 100.0).round() / 100.0).clamp(self.min, self.max)
    }
}
