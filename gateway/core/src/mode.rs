use std::fmt;
use std::time::Duration;

/// Per-request operating regime derived from predicted risk.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RequestMode {
    /// Full timeout and retry budget.
    Normal,
    /// Shortened deadline, no retries.
    Degraded,
    /// Rejected before contacting upstream.
    HardFail,
}

/// Risk cutoffs for mode selection.
#[derive(Copy, Clone, Debug)]
pub struct RiskPolicy {
    pub soft_threshold: f64,
    pub hard_threshold: f64,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            soft_threshold: 0.45,
            hard_threshold: 0.70,
        }
    }
}

/// Upstream dispatch budgets.
#[derive(Copy, Clone, Debug)]
pub struct UpstreamSettings {
    pub timeout: Duration,
    pub degraded_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            degraded_timeout: Duration::from_secs(1),
            max_retries: 2,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

impl RequestMode {
    pub fn from_risk(risk: f64, policy: &RiskPolicy) -> Self {
        if risk >= policy.hard_threshold {
            Self::HardFail
        } else if risk >= policy.soft_threshold {
            Self::Degraded
        } else {
            Self::Normal
        }
    }

    /// Effective upstream deadline for this mode.
    pub fn timeout(&self, upstream: &UpstreamSettings) -> Duration {
        match self {
            Self::Degraded => upstream.degraded_timeout,
            _ => upstream.timeout,
        }
    }

    /// Effective retry budget for this mode.
    pub fn retry_budget(&self, upstream: &UpstreamSettings) -> u32 {
        match self {
            Self::Normal => upstream.max_retries,
            _ => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Degraded => "DEGRADED",
            Self::HardFail => "HARD_FAIL",
        }
    }
}

impl fmt::Display for RequestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_selection_respects_both_cutoffs() {
        let policy = RiskPolicy::default();
        assert_eq!(RequestMode::from_risk(0.0, &policy), RequestMode::Normal);
        assert_eq!(RequestMode::from_risk(0.44, &policy), RequestMode::Normal);
        assert_eq!(RequestMode::from_risk(0.45, &policy), RequestMode::Degraded);
        assert_eq!(RequestMode::from_risk(0.69, &policy), RequestMode::Degraded);
        assert_eq!(RequestMode::from_risk(0.70, &policy), RequestMode::HardFail);
        assert_eq!(RequestMode::from_risk(1.0, &policy), RequestMode::HardFail);
    }

    #[test]
    fn degraded_mode_shortens_deadline_and_drops_retries() {
        let upstream = UpstreamSettings::default();
        assert_eq!(
            RequestMode::Degraded.timeout(&upstream),
            Duration::from_secs(1)
        );
        assert_eq!(RequestMode::Degraded.retry_budget(&upstream), 0);
        assert_eq!(
            RequestMode::Normal.timeout(&upstream),
            Duration::from_secs(2)
        );
        assert_eq!(RequestMode::Normal.retry_budget(&upstream), 2);
    }
}
