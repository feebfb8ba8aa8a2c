use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::Registry,
};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Upper bucket bounds (milliseconds) for the request-latency histograms.
const LATENCY_BUCKETS_MS: [f64; 10] = [
    5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

/// Substituted for the overflow bucket when it decides the p95, keeping the
/// feature finite.
pub const MAX_LATENCY_MS: f64 = 5000.0;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub endpoint: String,
    pub method: String,
    pub status: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EndpointLabels {
    pub endpoint: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct UpstreamLabels {
    pub endpoint: String,
    pub method: String,
}

/// The gateway's metric surface.
///
/// Labeled instruments feed the scrape endpoint. The unlabeled twins and
/// the cumulative latency buckets give the feature sampler direct
/// cumulative reads without scanning the registry.
#[derive(Clone, Debug)]
pub struct GatewayMetrics {
    api_requests: Family<RequestLabels, Counter>,
    request_latency: Family<EndpointLabels, Histogram>,
    upstream_timeouts: Family<UpstreamLabels, Counter>,
    upstream_5xx: Family<UpstreamLabels, Counter>,
    upstream_retries: Family<UpstreamLabels, Counter>,
    retry_exhausted: Family<UpstreamLabels, Counter>,

    requests: Counter,
    failures: Counter,
    timeouts: Counter,
    retries: Counter,
    latency: LatencyBuckets,
}

impl GatewayMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let api_requests = Family::<RequestLabels, Counter>::default();
        reg.register(
            "api_requests",
            "Total requests handled by the gateway",
            api_requests.clone(),
        );

        let request_latency = Family::<EndpointLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(LATENCY_BUCKETS_MS)
        });
        reg.register(
            "api_request_latency_ms",
            "Upstream response latency in milliseconds",
            request_latency.clone(),
        );

        let upstream_timeouts = Family::<UpstreamLabels, Counter>::default();
        reg.register(
            "upstream_timeouts",
            "Upstream calls abandoned at their deadline or failed in transport",
            upstream_timeouts.clone(),
        );

        let upstream_5xx = Family::<UpstreamLabels, Counter>::default();
        reg.register(
            "upstream_5xx_errors",
            "Upstream responses with a 5xx status",
            upstream_5xx.clone(),
        );

        let upstream_retries = Family::<UpstreamLabels, Counter>::default();
        reg.register(
            "upstream_retries",
            "Retried upstream attempts",
            upstream_retries.clone(),
        );

        let retry_exhausted = Family::<UpstreamLabels, Counter>::default();
        reg.register(
            "upstream_retry_exhausted",
            "Requests that timed out with no retry budget remaining",
            retry_exhausted.clone(),
        );

        Self {
            api_requests,
            request_latency,
            upstream_timeouts,
            upstream_5xx,
            upstream_retries,
            retry_exhausted,
            requests: Counter::default(),
            failures: Counter::default(),
            timeouts: Counter::default(),
            retries: Counter::default(),
            latency: LatencyBuckets::new(LATENCY_BUCKETS_MS),
        }
    }

    pub fn record_request(&self, endpoint: &str, method: &str, status: u16) {
        self.api_requests
            .get_or_create(&RequestLabels {
                endpoint: endpoint.to_string(),
                method: method.to_string(),
                status: status.to_string(),
            })
            .inc();
        self.requests.inc();
    }

    pub fn record_latency(&self, endpoint: &str, latency_ms: f64) {
        self.request_latency
            .get_or_create(&EndpointLabels {
                endpoint: endpoint.to_string(),
            })
            .observe(latency_ms);
        self.latency.observe(latency_ms);
    }

    pub fn record_timeout(&self, endpoint: &str, method: &str) {
        self.upstream_timeouts
            .get_or_create(&upstream_labels(endpoint, method))
            .inc();
        self.timeouts.inc();
    }

    pub fn record_upstream_failure(&self, endpoint: &str, method: &str) {
        self.upstream_5xx
            .get_or_create(&upstream_labels(endpoint, method))
            .inc();
        self.failures.inc();
    }

    pub fn record_retry(&self, endpoint: &str, method: &str) {
        self.upstream_retries
            .get_or_create(&upstream_labels(endpoint, method))
            .inc();
        self.retries.inc();
    }

    pub fn record_retry_exhausted(&self, endpoint: &str, method: &str) {
        self.retry_exhausted
            .get_or_create(&upstream_labels(endpoint, method))
            .inc();
    }

    // Cumulative reads for the feature sampler.

    pub fn requests_total(&self) -> f64 {
        self.requests.get() as f64
    }

    pub fn failures_total(&self) -> f64 {
        self.failures.get() as f64
    }

    pub fn timeouts_total(&self) -> f64 {
        self.timeouts.get() as f64
    }

    pub fn retries_total(&self) -> f64 {
        self.retries.get() as f64
    }

    pub fn latency_p95_ms(&self) -> f64 {
        self.latency.percentile95()
    }
}

fn upstream_labels(endpoint: &str, method: &str) -> UpstreamLabels {
    UpstreamLabels {
        endpoint: endpoint.to_string(),
        method: method.to_string(),
    }
}

/// Bucket counts mirroring the exposition histogram, readable in-process.
///
/// One slot per bound plus an overflow slot standing in for the +Inf
/// bucket; cumulative counts are computed at read time.
#[derive(Clone, Debug)]
struct LatencyBuckets {
    bounds: Arc<[f64]>,
    counts: Arc<[AtomicU64]>,
}

impl LatencyBuckets {
    fn new(bounds: impl IntoIterator<Item = f64>) -> Self {
        let bounds: Vec<f64> = bounds.into_iter().collect();
        let counts: Vec<AtomicU64> = (0..bounds.len() + 1).map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds: bounds.into(),
            counts: counts.into(),
        }
    }

    fn observe(&self, value: f64) {
        let idx = self
            .bounds
            .iter()
            .position(|le| value <= *le)
            .unwrap_or(self.bounds.len());
        self.counts[idx].fetch_add(1, Ordering::Relaxed);
    }

    /// Smallest bucket bound whose cumulative count covers 95% of all
    /// observations; 0 with no observations, `MAX_LATENCY_MS` when only the
    /// overflow bucket qualifies.
    fn percentile95(&self) -> f64 {
        let counts: Vec<u64> = self
            .counts
            .iter()
            .map(|count| count.load(Ordering::Relaxed))
            .collect();
        let total: u64 = counts.iter().sum();
        if total == 0 {
            return 0.0;
        }

        let threshold = total as f64 * 0.95;
        let mut cumulative = 0u64;
        for (i, count) in counts.iter().enumerate() {
            cumulative += count;
            if cumulative as f64 >= threshold {
                return if i < self.bounds.len() {
                    self.bounds[i]
                } else {
                    MAX_LATENCY_MS
                };
            }
        }
        MAX_LATENCY_MS
    }
}
