use crate::metrics::GatewayMetrics;
use breakwater_gateway_core::{CircuitMetrics, FeatureVector, RollingWindow};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::debug;

#[derive(Copy, Clone, Debug)]
pub struct ExtractorSettings {
    /// Capacity of each telemetry window, in ticks.
    pub window_size: usize,
    pub sample_interval: Duration,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            window_size: 30,
            sample_interval: Duration::from_secs(1),
        }
    }
}

/// Samples the cumulative gateway counters on a fixed cadence into rolling
/// windows and derives the feature vector consumed by the risk predictor,
/// the adaptive thresholds, and the training-data logger.
///
/// The sampler task is the only writer; readers take a snapshot under the
/// read lock.
pub struct FeatureExtractor {
    metrics: Arc<GatewayMetrics>,
    circuit: CircuitMetrics,
    settings: ExtractorSettings,
    windows: RwLock<Windows>,
}

struct Windows {
    total: RollingWindow<f64>,
    failures: RollingWindow<f64>,
    timeouts: RollingWindow<f64>,
    retries: RollingWindow<f64>,
    latency_p95: RollingWindow<f64>,
    circuit_flaps: RollingWindow<f64>,
    last: Option<CounterSnapshot>,
}

#[derive(Copy, Clone, Debug)]
struct CounterSnapshot {
    total: f64,
    failures: f64,
    timeouts: f64,
    retries: f64,
    flaps: f64,
}

impl FeatureExtractor {
    pub fn new(
        metrics: Arc<GatewayMetrics>,
        circuit: CircuitMetrics,
        settings: ExtractorSettings,
    ) -> Self {
        let window = || RollingWindow::new(settings.window_size);
        Self {
            metrics,
            circuit,
            settings,
            windows: RwLock::new(Windows {
                total: window(),
                failures: window(),
                timeouts: window(),
                retries: window(),
                latency_p95: window(),
                circuit_flaps: window(),
                last: None,
            }),
        }
    }

    /// Sampler task: one tick per `sample_interval` until drain.
    pub async fn run(self: Arc<Self>, drain: drain::Watch) {
        let mut interval = tokio::time::interval(self.settings.sample_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => self.sample(),
                _ = drain.clone().signaled() => {
                    debug!("Feature sampler shutting down");
                    return;
                }
            }
        }
    }

    /// Takes one sampling tick: reads the cumulative counters and appends
    /// the per-tick deltas (and the current p95) to the rolling windows.
    ///
    /// The first tick appends zero deltas; a counter drop (process restart)
    /// also samples as zero.
    pub fn sample(&self) {
        let current = CounterSnapshot {
            total: self.metrics.requests_total(),
            failures: self.metrics.failures_total(),
            timeouts: self.metrics.timeouts_total(),
            retries: self.metrics.retries_total(),
            flaps: self.circuit.opened_total() as f64,
        };
        let p95 = self.metrics.latency_p95_ms();

        let mut windows = self.windows.write();
        let last = windows.last.unwrap_or(current);
        windows.total.push(delta(last.total, current.total));
        windows.failures.push(delta(last.failures, current.failures));
        windows.timeouts.push(delta(last.timeouts, current.timeouts));
        windows.retries.push(delta(last.retries, current.retries));
        windows
            .circuit_flaps
            .push(delta(last.flaps, current.flaps));
        windows.latency_p95.push(p95);
        windows.last = Some(current);
    }

    /// Derives the current feature vector. Empty until the total window has
    /// seen traffic.
    pub fn compute_features(&self) -> FeatureVector {
        let windows = self.windows.read();
        let total = windows.total.sum();
        if total == 0.0 {
            return FeatureVector::new();
        }

        let mut features = FeatureVector::new();
        features.insert("failure_ratio", round4(windows.failures.sum() / total));
        features.insert("failure_ratio_slope", round4(slope(&windows.failures)));
        features.insert(
            "p95_latency",
            round2(windows.latency_p95.last().copied().unwrap_or(0.0)),
        );
        features.insert("latency_slope", round2(slope(&windows.latency_p95)));
        features.insert("retry_rate", round4(windows.retries.sum() / total));
        features.insert("timeout_rate", round4(windows.timeouts.sum() / total));
        features.insert("error_burstiness", round2(burstiness(&windows.failures)));
        features.insert(
            "circuit_flap_rate",
            round4(windows.circuit_flaps.sum() / self.settings.window_size as f64),
        );
        features
    }
}

fn delta(previous: f64, current: f64) -> f64 {
    (current - previous).max(0.0)
}

/// End-to-end slope over the window; 0 below two samples.
fn slope(window: &RollingWindow<f64>) -> f64 {
    if window.len() < 2 {
        return 0.0;
    }
    match (window.first(), window.last()) {
        (Some(first), Some(last)) => (last - first) / window.len() as f64,
        _ => 0.0,
    }
}

/// Coefficient of variation (sample stdev over mean); 0 when the mean is 0
/// or below two samples.
fn burstiness(window: &RollingWindow<f64>) -> f64 {
    if window.len() < 2 {
        return 0.0;
    }
    let mean = window.mean();
    if mean == 0.0 {
        return 0.0;
    }
    let n = window.len() as f64;
    let variance = window
        .iter()
        .map(|value| (value - mean).powi(2))
        .sum::<f64>()
        / (n - 1.0);
    variance.sqrt() / mean
}

fn round4(value: f64) -> f64 {
    (value * 1e4).round() / 1e4
}

fn round2(value: f64) -> f64 {
    (value * 1e2).round() / 1e2
}
