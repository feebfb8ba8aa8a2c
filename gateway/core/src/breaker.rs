use crate::window::RollingWindow;
use parking_lot::Mutex;
use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge, histogram::Histogram},
    registry::Registry,
};
use std::time::Duration;
use tokio::time::Instant;

/// Admission gate state, as exported by the `circuit_state` gauge.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }

    fn gauge_value(self) -> i64 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }
}

/// Per-request admission decision.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Forward the request upstream. `probe` marks the single half-open
    /// trial request.
    Allow { probe: bool },
    /// The breaker is open and its recovery timeout has not elapsed.
    Open,
    /// A half-open trial request is already outstanding.
    ProbeInFlight,
}

#[derive(Copy, Clone, Debug)]
pub struct BreakerSettings {
    /// Capacity of the rolling outcome window.
    pub window_size: usize,
    /// Minimum tracked outcomes before the failure ratio is acted on.
    pub min_requests: usize,
    /// Failure ratio at or above which the breaker trips.
    pub failure_threshold: f64,
    /// How long an open breaker rejects before admitting a probe.
    pub open_duration: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            window_size: 20,
            min_requests: 10,
            failure_threshold: 0.5,
            open_duration: Duration::from_secs(30),
        }
    }
}

/// Instruments describing breaker behavior.
#[derive(Clone, Debug)]
pub struct CircuitMetrics {
    state: Gauge,
    opened: Counter,
    short_circuited: Counter,
    tracked: Counter,
    failure_ratio: Histogram,
}

impl CircuitMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let state = Gauge::default();
        reg.register(
            "circuit_state",
            "Breaker state (0=CLOSED, 1=OPEN, 2=HALF_OPEN)",
            state.clone(),
        );

        let opened = Counter::default();
        reg.register(
            "circuit_open",
            "Total number of transitions to the OPEN state",
            opened.clone(),
        );

        let short_circuited = Counter::default();
        reg.register(
            "circuit_short_circuited",
            "Requests rejected by the gateway without contacting upstream",
            short_circuited.clone(),
        );

        let tracked = Counter::default();
        reg.register(
            "circuit_requests_tracked",
            "Terminal request outcomes recorded in the failure window",
            tracked.clone(),
        );

        let failure_ratio = Histogram::new([0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0]);
        reg.register(
            "circuit_failure_ratio",
            "Rolling failure ratio observed at each tracked outcome",
            failure_ratio.clone(),
        );

        Self {
            state,
            opened,
            short_circuited,
            tracked,
            failure_ratio,
        }
    }

    /// Cumulative count of OPEN transitions. The feature sampler reads this
    /// as its circuit-flap source.
    pub fn opened_total(&self) -> u64 {
        self.opened.get()
    }

    pub fn short_circuited_total(&self) -> u64 {
        self.short_circuited.get()
    }

    pub fn tracked_total(&self) -> u64 {
        self.tracked.get()
    }
}

/// Reactive admission gate: a CLOSED/OPEN/HALF_OPEN state machine driven by
/// a rolling window of terminal request outcomes.
///
/// Every composite transition (check state, act, update state) runs under
/// one mutex so concurrent arrivals observe it atomically; in particular at
/// most one HALF_OPEN probe is ever outstanding.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    settings: BreakerSettings,
    metrics: CircuitMetrics,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    window: RollingWindow<bool>,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings, metrics: CircuitMetrics) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                opened_at: None,
                probe_in_flight: false,
                window: RollingWindow::new(settings.window_size),
            }),
            settings,
            metrics,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    /// Fraction of failures in the rolling window; 0 when empty.
    pub fn failure_ratio(&self) -> f64 {
        self.inner.lock().window.ratio()
    }

    pub fn window_len(&self) -> usize {
        self.inner.lock().window.len()
    }

    pub fn opened_total(&self) -> u64 {
        self.metrics.opened_total()
    }

    pub fn short_circuited_total(&self) -> u64 {
        self.metrics.short_circuited_total()
    }

    /// Decides admission for one inbound request.
    ///
    /// An open breaker whose recovery timeout has elapsed transitions to
    /// HALF_OPEN and admits the caller as the probe.
    pub fn admit(&self) -> Admission {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Admission::Allow { probe: false },
            CircuitState::Open => {
                let expired = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.settings.open_duration)
                    .unwrap_or(true);
                if expired {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    self.metrics.state.set(CircuitState::HalfOpen.gauge_value());
                    Admission::Allow { probe: true }
                } else {
                    self.metrics.short_circuited.inc();
                    Admission::Open
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    self.metrics.short_circuited.inc();
                    Admission::ProbeInFlight
                } else {
                    inner.probe_in_flight = true;
                    Admission::Allow { probe: true }
                }
            }
        }
    }

    /// Records one terminal request outcome: appends it to the window,
    /// closes the breaker when a half-open probe succeeds, and observes the
    /// resulting failure ratio.
    pub fn observe(&self, failure: bool) {
        let mut inner = self.inner.lock();
        inner.window.push(failure);
        self.metrics.tracked.inc();
        if inner.state == CircuitState::HalfOpen && !failure {
            self.close_locked(&mut inner);
        }
        self.metrics.failure_ratio.observe(inner.window.ratio());
    }

    /// Trips the breaker when the window crosses the failure threshold.
    /// No-op unless the breaker is CLOSED.
    pub fn maybe_open(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            return;
        }
        if inner.window.len() >= self.settings.min_requests
            && inner.window.ratio() >= self.settings.failure_threshold
        {
            tracing::warn!(
                failure_ratio = inner.window.ratio(),
                "Failure window crossed threshold, opening circuit"
            );
            self.trip_locked(&mut inner);
        }
    }

    /// Entry point for the predictive controller: opens a CLOSED breaker
    /// without an observed failure. Returns whether the breaker opened.
    pub fn predictive_open(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            return false;
        }
        self.trip_locked(&mut inner);
        true
    }

    /// Reopens the breaker after a failed half-open probe.
    pub fn fail_probe(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::HalfOpen {
            return;
        }
        self.trip_locked(&mut inner);
    }

    /// Releases the half-open probe slot without recording an outcome. Used
    /// when an admitted probe is rejected before reaching upstream.
    pub fn release_probe(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    /// Counts a gateway-originated rejection that bypassed admission
    /// accounting (the predictive hard-fail path).
    pub fn record_short_circuit(&self) {
        self.metrics.short_circuited.inc();
    }

    fn trip_locked(&self, inner: &mut Inner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.probe_in_flight = false;
        self.metrics.opened.inc();
        self.metrics.state.set(CircuitState::Open.gauge_value());
    }

    fn close_locked(&self, inner: &mut Inner) {
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        inner.probe_in_flight = false;
        inner.window.clear();
        self.metrics.state.set(CircuitState::Closed.gauge_value());
    }
}
