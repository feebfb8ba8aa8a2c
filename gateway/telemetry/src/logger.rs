use crate::extractor::FeatureExtractor;
use breakwater_gateway_core::{FeatureVector, FEATURE_NAMES};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

const CSV_HEADER: &str = "timestamp,failure_ratio,failure_ratio_slope,p95_latency,latency_slope,retry_rate,timeout_rate,error_burstiness,circuit_flap_rate,label_failure_next_30s";

#[derive(Clone, Debug)]
pub struct LoggerSettings {
    pub output_path: PathBuf,
    pub log_interval: Duration,
    /// Failure ratio at or above which a row is labeled 1.
    pub failure_threshold: f64,
    /// How long a sample waits before its label reflects future conditions.
    pub label_window: Duration,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("dataset/phase3_features.csv"),
            log_interval: Duration::from_secs(5),
            failure_threshold: 0.5,
            label_window: Duration::from_secs(30),
        }
    }
}

/// Buffers sampled feature vectors until enough time has passed to label
/// them against observed conditions, then appends them to the training CSV.
///
/// A sink failure drops the batch; it never reaches the request path.
pub struct FeatureLogger {
    extractor: Arc<FeatureExtractor>,
    settings: LoggerSettings,
    buffer: Vec<(f64, FeatureVector)>,
}

impl FeatureLogger {
    /// Creates the sink (and its parent directory) if absent, writing the
    /// header exactly once.
    pub fn new(extractor: Arc<FeatureExtractor>, settings: LoggerSettings) -> std::io::Result<Self> {
        if let Some(parent) = settings.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        if !settings.output_path.exists() {
            fs::write(&settings.output_path, format!("{CSV_HEADER}\n"))?;
        }
        Ok(Self {
            extractor,
            settings,
            buffer: Vec::new(),
        })
    }

    /// Logger task: one tick per `log_interval` until drain.
    pub async fn run(mut self, drain: drain::Watch) {
        let mut interval = tokio::time::interval(self.settings.log_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick(unix_now()),
                _ = drain.clone().signaled() => {
                    debug!("Feature logger shutting down");
                    return;
                }
            }
        }
    }

    /// One logging tick at Unix time `now` (seconds): enqueues the current
    /// features and flushes every buffered entry old enough to label.
    pub fn tick(&mut self, now: f64) {
        let features = self.extractor.compute_features();
        if !features.is_empty() {
            self.buffer.push((now, features));
        }

        let cutoff = now - self.settings.label_window.as_secs_f64();
        let mut labeled = Vec::new();
        self.buffer.retain(|(ts, features)| {
            if *ts <= cutoff {
                labeled.push((*ts, features.clone()));
                false
            } else {
                true
            }
        });
        if labeled.is_empty() {
            return;
        }

        if let Err(error) = self.append(&labeled) {
            warn!(
                path = %self.settings.output_path.display(),
                %error,
                "Failed to append labeled rows, dropping batch"
            );
        }
    }

    fn append(&self, rows: &[(f64, FeatureVector)]) -> std::io::Result<()> {
        let mut out = String::new();
        for (ts, features) in rows {
            let label = if features.get("failure_ratio").unwrap_or(0.0)
                >= self.settings.failure_threshold
            {
                1
            } else {
                0
            };
            out.push_str(&ts.to_string());
            for name in FEATURE_NAMES {
                out.push(',');
                out.push_str(&features.get(name).unwrap_or(0.0).to_string());
            }
            out.push(',');
            out.push_str(&label.to_string());
            out.push('\n');
        }

        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.settings.output_path)?;
        file.write_all(out.as_bytes())
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}
