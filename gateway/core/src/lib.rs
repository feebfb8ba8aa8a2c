#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod breaker;
mod features;
mod mode;
mod predictor;
mod threshold;
mod window;

pub use self::{
    breaker::{Admission, BreakerSettings, CircuitBreaker, CircuitMetrics, CircuitState},
    features::{FeatureVector, FEATURE_NAMES},
    mode::{RequestMode, RiskPolicy, UpstreamSettings},
    predictor::{ModelLoadError, RiskModel, RiskPredictor},
    threshold::AdaptiveThresholds,
    window::RollingWindow,
};
