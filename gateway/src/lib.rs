#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod admin;
mod args;
mod predictive;
mod proxy;
mod server;

pub use self::{
    args::Args,
    predictive::{PredictiveController, PredictiveSettings},
    server::serve,
};

use anyhow::{Context, Result};
use breakwater_gateway_core::{
    AdaptiveThresholds, BreakerSettings, CircuitBreaker, CircuitMetrics, RiskPolicy,
    RiskPredictor, UpstreamSettings,
};
use breakwater_gateway_telemetry::{
    ExtractorSettings, FeatureExtractor, FeatureLogger, GatewayMetrics, LoggerSettings,
};
use bytes::Bytes;
use http_body_util::Full;
use hyper::{body::Body, Request, Response};
use prometheus_client::registry::Registry;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info_span, Instrument};

/// Startup-time configuration; the defaults encode the documented
/// constants.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Upstream origin requests are forwarded to.
    pub upstream_url: String,
    /// Risk-model artifact; predictions are disabled when absent.
    pub model_path: Option<PathBuf>,
    pub breaker: BreakerSettings,
    pub extractor: ExtractorSettings,
    pub thresholds: AdaptiveThresholds,
    pub risk_policy: RiskPolicy,
    pub upstream: UpstreamSettings,
}

impl GatewayConfig {
    pub fn new(upstream_url: impl Into<String>) -> Self {
        Self {
            upstream_url: upstream_url.into(),
            model_path: None,
            breaker: BreakerSettings::default(),
            extractor: ExtractorSettings::default(),
            thresholds: AdaptiveThresholds::default(),
            risk_policy: RiskPolicy::default(),
            upstream: UpstreamSettings::default(),
        }
    }
}

/// Everything a request handler needs: the metric surface, the breaker, the
/// feature pipeline, and the upstream client, constructed bottom-up at
/// startup and shared by reference across tasks.
pub struct Gateway {
    registry: Registry,
    metrics: Arc<GatewayMetrics>,
    breaker: Arc<CircuitBreaker>,
    extractor: Arc<FeatureExtractor>,
    predictor: Arc<RiskPredictor>,
    thresholds: AdaptiveThresholds,
    risk_policy: RiskPolicy,
    upstream: UpstreamSettings,
    client: reqwest::Client,
    upstream_url: String,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Result<Arc<Self>> {
        let GatewayConfig {
            upstream_url,
            model_path,
            breaker,
            extractor,
            thresholds,
            risk_policy,
            upstream,
        } = config;

        reqwest::Url::parse(&upstream_url)
            .with_context(|| format!("invalid upstream url {upstream_url}"))?;

        let mut registry = Registry::default();
        let metrics = Arc::new(GatewayMetrics::register(&mut registry));
        let circuit_metrics = CircuitMetrics::register(&mut registry);
        let breaker = Arc::new(CircuitBreaker::new(breaker, circuit_metrics.clone()));
        let extractor = Arc::new(FeatureExtractor::new(
            metrics.clone(),
            circuit_metrics,
            extractor,
        ));
        let predictor = Arc::new(match model_path {
            Some(path) => RiskPredictor::from_artifact(path),
            None => RiskPredictor::new(None),
        });
        let client = reqwest::Client::builder()
            .build()
            .context("failed to build upstream client")?;

        Ok(Arc::new(Self {
            registry,
            metrics,
            breaker,
            extractor,
            predictor,
            thresholds,
            risk_policy,
            upstream,
            client,
            upstream_url: upstream_url.trim_end_matches('/').to_string(),
        }))
    }

    /// Spawns the feature sampler, the training-data logger, and the
    /// predictive controller.
    pub fn spawn_background(
        self: &Arc<Self>,
        logger: LoggerSettings,
        predictive: PredictiveSettings,
        drain: drain::Watch,
    ) -> Result<()> {
        tokio::spawn(
            self.extractor
                .clone()
                .run(drain.clone())
                .instrument(info_span!("sampler")),
        );

        let feature_logger = FeatureLogger::new(self.extractor.clone(), logger)
            .context("failed to create feature sink")?;
        tokio::spawn(
            feature_logger
                .run(drain.clone())
                .instrument(info_span!("feature_logger")),
        );

        let controller = PredictiveController::new(
            self.breaker.clone(),
            self.extractor.clone(),
            self.predictor.clone(),
            self.thresholds,
            predictive,
        );
        tokio::spawn(controller.run(drain).instrument(info_span!("predictive")));
        Ok(())
    }

    /// Routes one inbound request: the administrative surface first, then
    /// the proxy catch-all.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body + Send,
        B::Data: Send,
        B::Error: fmt::Display,
    {
        if let Some(response) = admin::respond(self, &req) {
            return response;
        }
        proxy::proxy(self, req).await
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    pub fn predictor(&self) -> &RiskPredictor {
        &self.predictor
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn thresholds(&self) -> AdaptiveThresholds {
        self.thresholds
    }

    pub fn risk_policy(&self) -> RiskPolicy {
        self.risk_policy
    }

    pub fn upstream_settings(&self) -> UpstreamSettings {
        self.upstream
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub(crate) fn upstream_url(&self) -> &str {
        &self.upstream_url
    }
}
