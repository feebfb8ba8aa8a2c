use breakwater_gateway_core::{AdaptiveThresholds, CircuitBreaker, RiskPredictor};
use breakwater_gateway_telemetry::FeatureExtractor;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

#[derive(Copy, Clone, Debug)]
pub struct PredictiveSettings {
    pub check_interval: Duration,
    /// Minimum spacing between predictive opens.
    pub cooldown: Duration,
}

impl Default for PredictiveSettings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Watches the feature stream and opens the breaker ahead of the reactive
/// threshold when predicted risk crosses the adaptive cutoff. The only
/// component allowed to open the breaker without an observed failure.
pub struct PredictiveController {
    breaker: Arc<CircuitBreaker>,
    extractor: Arc<FeatureExtractor>,
    predictor: Arc<RiskPredictor>,
    thresholds: AdaptiveThresholds,
    settings: PredictiveSettings,
    last_action: Option<Instant>,
}

impl PredictiveController {
    pub fn new(
        breaker: Arc<CircuitBreaker>,
        extractor: Arc<FeatureExtractor>,
        predictor: Arc<RiskPredictor>,
        thresholds: AdaptiveThresholds,
        settings: PredictiveSettings,
    ) -> Self {
        Self {
            breaker,
            extractor,
            predictor,
            thresholds,
            settings,
            last_action: None,
        }
    }

    /// Controller task: one tick per `check_interval` until drain.
    pub async fn run(mut self, drain: drain::Watch) {
        let mut interval = tokio::time::interval(self.settings.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick(),
                _ = drain.clone().signaled() => {
                    debug!("Predictive controller shutting down");
                    return;
                }
            }
        }
    }

    /// One control tick: skip unless the breaker is CLOSED and the cooldown
    /// has elapsed, then open preemptively when risk crosses the adaptive
    /// threshold.
    pub fn tick(&mut self) {
        if !self.breaker.is_closed() {
            return;
        }
        if let Some(last) = self.last_action {
            if last.elapsed() < self.settings.cooldown {
                return;
            }
        }

        let features = self.extractor.compute_features();
        let risk = self.predictor.predict_risk(&features);
        let threshold = self.thresholds.compute(&features);
        if risk < threshold {
            return;
        }

        if self.breaker.predictive_open() {
            self.last_action = Some(Instant::now());
            warn!(risk, threshold, "Predicted risk crossed threshold, opening circuit");
        }
    }
}
