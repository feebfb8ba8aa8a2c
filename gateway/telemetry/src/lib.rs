#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod extractor;
mod logger;
mod metrics;

pub use self::{
    extractor::{ExtractorSettings, FeatureExtractor},
    logger::{FeatureLogger, LoggerSettings},
    metrics::{GatewayMetrics, MAX_LATENCY_MS},
};
