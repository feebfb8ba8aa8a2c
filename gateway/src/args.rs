use crate::{server, Gateway, GatewayConfig, PredictiveSettings};
use anyhow::{Context, Result};
use breakwater_gateway_core::{
    AdaptiveThresholds, BreakerSettings, RiskPolicy, UpstreamSettings,
};
use breakwater_gateway_telemetry::{ExtractorSettings, LoggerSettings};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[clap(name = "breakwater", about = "A failure-mitigating reverse-proxy gateway")]
pub struct Args {
    #[clap(long, default_value = "breakwater=info,warn", env = "BREAKWATER_LOG")]
    log_level: String,

    /// Address the gateway listens on.
    #[clap(long, default_value = "0.0.0.0:8080")]
    addr: SocketAddr,

    /// Upstream origin requests are forwarded to.
    #[clap(long, env = "BREAKWATER_UPSTREAM")]
    upstream: String,

    /// Risk-model artifact; predictions are disabled when absent.
    #[clap(long)]
    model: Option<PathBuf>,

    /// Labeled feature rows are appended here.
    #[clap(long, default_value = "dataset/phase3_features.csv")]
    dataset: PathBuf,

    /// Telemetry window capacity, in samples.
    #[clap(long, default_value = "30")]
    feature_window: usize,

    /// Telemetry sampling cadence, in seconds.
    #[clap(long, default_value = "1.0")]
    sample_interval: f64,

    /// Feature-logging cadence, in seconds.
    #[clap(long, default_value = "5.0")]
    log_interval: f64,

    /// Delay before a logged sample is labeled, in seconds.
    #[clap(long, default_value = "30.0")]
    label_window: f64,

    /// Failure ratio at or above which a logged sample is labeled 1.
    #[clap(long, default_value = "0.5")]
    label_failure_threshold: f64,

    /// Outcome window capacity of the circuit breaker.
    #[clap(long, default_value = "20")]
    circuit_window: usize,

    /// Minimum tracked outcomes before the breaker may trip.
    #[clap(long, default_value = "10")]
    circuit_min_requests: usize,

    /// Failure ratio at or above which the breaker trips.
    #[clap(long, default_value = "0.5")]
    circuit_failure_threshold: f64,

    /// How long an open breaker rejects before probing, in seconds.
    #[clap(long, default_value = "30.0")]
    circuit_open_duration: f64,

    /// Predictive-controller cadence, in seconds.
    #[clap(long, default_value = "5.0")]
    predictive_interval: f64,

    /// Minimum spacing between predictive opens, in seconds.
    #[clap(long, default_value = "30.0")]
    predictive_cooldown: f64,

    /// Upstream deadline in NORMAL mode, in seconds.
    #[clap(long, default_value = "2.0")]
    upstream_timeout: f64,

    /// Upstream deadline in DEGRADED mode, in seconds.
    #[clap(long, default_value = "1.0")]
    degraded_timeout: f64,

    /// Retry budget for idempotent requests in NORMAL mode.
    #[clap(long, default_value = "2")]
    max_retries: u32,

    /// Base retry back-off, in seconds.
    #[clap(long, default_value = "0.2")]
    retry_backoff: f64,

    /// Risk at or above which requests run DEGRADED.
    #[clap(long, default_value = "0.45")]
    soft_risk_threshold: f64,

    /// Risk at or above which requests are rejected outright.
    #[clap(long, default_value = "0.70")]
    hard_risk_threshold: f64,

    /// Starting point for the adaptive risk threshold.
    #[clap(long, default_value = "0.7")]
    base_threshold: f64,

    /// Floor of the adaptive risk threshold.
    #[clap(long, default_value = "0.4")]
    min_threshold: f64,

    /// Ceiling of the adaptive risk threshold.
    #[clap(long, default_value = "0.9")]
    max_threshold: f64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(&self.log_level))
            .init();

        let config = GatewayConfig {
            upstream_url: self.upstream.clone(),
            model_path: self.model.clone(),
            breaker: BreakerSettings {
                window_size: self.circuit_window,
                min_requests: self.circuit_min_requests,
                failure_threshold: self.circuit_failure_threshold,
                open_duration: Duration::from_secs_f64(self.circuit_open_duration),
            },
            extractor: ExtractorSettings {
                window_size: self.feature_window,
                sample_interval: Duration::from_secs_f64(self.sample_interval),
            },
            thresholds: AdaptiveThresholds {
                base: self.base_threshold,
                min: self.min_threshold,
                max: self.max_threshold,
            },
            risk_policy: RiskPolicy {
                soft_threshold: self.soft_risk_threshold,
                hard_threshold: self.hard_risk_threshold,
            },
            upstream: UpstreamSettings {
                timeout: Duration::from_secs_f64(self.upstream_timeout),
                degraded_timeout: Duration::from_secs_f64(self.degraded_timeout),
                max_retries: self.max_retries,
                retry_backoff: Duration::from_secs_f64(self.retry_backoff),
            },
        };

        let gateway = Gateway::new(config)?;
        let (close, watch) = drain::channel();

        gateway
            .spawn_background(
                LoggerSettings {
                    output_path: self.dataset.clone(),
                    log_interval: Duration::from_secs_f64(self.log_interval),
                    failure_threshold: self.label_failure_threshold,
                    label_window: Duration::from_secs_f64(self.label_window),
                },
                PredictiveSettings {
                    check_interval: Duration::from_secs_f64(self.predictive_interval),
                    cooldown: Duration::from_secs_f64(self.predictive_cooldown),
                },
                watch.clone(),
            )
            .context("failed to spawn background tasks")?;

        tokio::select! {
            result = server::serve(gateway, self.addr, watch) => result?,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, draining");
                close.drain().await;
            }
        }
        Ok(())
    }
}
