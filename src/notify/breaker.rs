//! Circuit breaker guarding the broker.
//!
//! Outcomes of calls made while CLOSED go into a count-based sliding window.
//! Once the window holds enough calls, a failure rate or slow-call rate at or
//! above its threshold opens the circuit. After the open-state wait the next
//! caller moves it to HALF_OPEN, where a fixed number of trial calls decide
//! between CLOSED (all succeeded) and OPEN (any failed).
//!
//! Every state change happens under one lock, so concurrent callers observe
//! a single transition.

use crate::config::duration_ms;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls short-circuit to the fallback.
    Open,
    /// A limited number of trial calls are allowed.
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    #[must_use]
    pub const fn is_half_open(&self) -> bool {
        matches!(self, Self::HalfOpen)
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Thresholds and timings for a circuit breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CircuitBreakerConfig {
    /// Failure percentage (0-100) at which the circuit opens.
    pub failure_rate_threshold: f32,
    /// Slow-call percentage (0-100) at which the circuit opens.
    pub slow_call_rate_threshold: f32,
    /// Calls taking at least this long count as slow.
    #[serde(with = "duration_ms")]
    pub slow_call_duration_threshold: Duration,
    /// How long the circuit stays open before allowing trial calls.
    #[serde(with = "duration_ms")]
    pub wait_duration_in_open_state: Duration,
    /// Trial calls allowed while half-open.
    pub permitted_calls_in_half_open_state: u32,
    /// Number of most recent calls the rates are computed over.
    pub sliding_window_size: u32,
    /// Calls needed in the window before rates are evaluated.
    pub minimum_number_of_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            slow_call_rate_threshold: 100.0,
            slow_call_duration_threshold: Duration::from_secs(60),
            wait_duration_in_open_state: Duration::from_secs(60),
            permitted_calls_in_half_open_state: 10,
            sliding_window_size: 100,
            minimum_number_of_calls: 100,
        }
    }
}

impl CircuitBreakerConfig {
    #[must_use]
    pub fn with_failure_rate_threshold(mut self, percent: f32) -> Self {
        self.failure_rate_threshold = percent;
        self
    }

    #[must_use]
    pub fn with_slow_call_threshold(mut self, percent: f32, duration: Duration) -> Self {
        self.slow_call_rate_threshold = percent;
        self.slow_call_duration_threshold = duration;
        self
    }

    #[must_use]
    pub fn with_wait_duration_in_open_state(mut self, wait: Duration) -> Self {
        self.wait_duration_in_open_state = wait;
        self
    }

    #[must_use]
    pub fn with_permitted_calls_in_half_open_state(mut self, calls: u32) -> Self {
        self.permitted_calls_in_half_open_state = calls;
        self
    }

    #[must_use]
    pub fn with_sliding_window(mut self, size: u32, minimum_calls: u32) -> Self {
        self.sliding_window_size = size;
        self.minimum_number_of_calls = minimum_calls;
        self
    }

    /// Calls required before rates are evaluated, capped by the window size.
    fn required_calls(&self) -> usize {
        self.minimum_number_of_calls
            .min(self.sliding_window_size)
            .max(1) as usize
    }
}

#[derive(Debug, Clone, Copy)]
struct CallOutcome {
    failed: bool,
    slow: bool,
}

/// Point-in-time view of the breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerMetrics {
    pub state: CircuitState,
    pub buffered_calls: usize,
    pub failed_calls: usize,
    pub slow_calls: usize,
    /// Failure percentage over the window, `None` until enough calls are buffered.
    pub failure_rate: Option<f32>,
    pub slow_call_rate: Option<f32>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    /// Outcomes of calls made while closed, oldest first.
    window: VecDeque<CallOutcome>,
    opened_at: Option<Instant>,
    half_open_permits: u32,
    half_open_successes: u32,
    last_failure_reason: Option<String>,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            window: VecDeque::new(),
            opened_at: None,
            half_open_permits: 0,
            half_open_successes: 0,
            last_failure_reason: None,
        }
    }

    fn rates(&self, config: &CircuitBreakerConfig) -> (Option<f32>, Option<f32>) {
        if self.window.len() < config.required_calls() {
            return (None, None);
        }
        let total = self.window.len() as f32;
        let failed = self.window.iter().filter(|o| o.failed).count() as f32;
        let slow = self.window.iter().filter(|o| o.slow).count() as f32;
        (Some(failed * 100.0 / total), Some(slow * 100.0 / total))
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.window.clear();
        self.half_open_permits = 0;
        self.half_open_successes = 0;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.window.clear();
        self.half_open_permits = 0;
        self.half_open_successes = 0;
        self.last_failure_reason = None;
    }
}

/// Circuit breaker for a single downstream dependency.
pub struct CircuitBreaker {
    /// Name of the protected dependency.
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState::new()),
        }
    }

    #[must_use]
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, moving OPEN to HALF_OPEN if the wait has elapsed.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let mut state = self.state.lock();
        self.maybe_half_open(&mut state);
        state.state
    }

    /// Ask to make a call. Returns false when the call must not be attempted.
    ///
    /// Every granted permission must be followed by `on_success` or `on_error`.
    pub fn try_acquire_permission(&self) -> bool {
        let mut state = self.state.lock();
        self.maybe_half_open(&mut state);

        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if state.half_open_permits < self.config.permitted_calls_in_half_open_state {
                    state.half_open_permits += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a call that completed successfully after `elapsed`.
    pub fn on_success(&self, elapsed: Duration) {
        let slow = elapsed >= self.config.slow_call_duration_threshold;
        let mut state = self.state.lock();

        match state.state {
            CircuitState::Closed => self.record_closed(&mut state, CallOutcome { failed: false, slow }),
            CircuitState::HalfOpen => {
                state.half_open_successes += 1;
                debug!(
                    service = %self.name,
                    successes = state.half_open_successes,
                    permitted = self.config.permitted_calls_in_half_open_state,
                    "Circuit breaker trial call succeeded"
                );
                if state.half_open_successes >= self.config.permitted_calls_in_half_open_state {
                    info!(service = %self.name, "Circuit breaker closed - dependency recovered");
                    state.close();
                }
            }
            // Late result of a call permitted before the circuit opened.
            CircuitState::Open => {}
        }
    }

    /// Record a call that failed after `elapsed`.
    pub fn on_error(&self, elapsed: Duration, reason: impl Into<String>) {
        let slow = elapsed >= self.config.slow_call_duration_threshold;
        let reason = reason.into();
        let mut state = self.state.lock();

        match state.state {
            CircuitState::Closed => {
                state.last_failure_reason = Some(reason);
                self.record_closed(&mut state, CallOutcome { failed: true, slow });
            }
            CircuitState::HalfOpen => {
                warn!(
                    service = %self.name,
                    reason = %reason,
                    "Circuit breaker reopened from half-open state"
                );
                state.last_failure_reason = Some(reason);
                state.open();
            }
            CircuitState::Open => {
                state.last_failure_reason = Some(reason);
            }
        }
    }

    /// Force the circuit open, e.g. when the dependency is known to be down.
    pub fn trip(&self) {
        let mut state = self.state.lock();
        if !state.state.is_open() {
            warn!(service = %self.name, "Circuit breaker manually opened");
            state.open();
        }
    }

    /// Manually reset to CLOSED with an empty window.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        info!(service = %self.name, "Circuit breaker manually reset");
        state.close();
    }

    #[must_use]
    pub fn last_failure_reason(&self) -> Option<String> {
        self.state.lock().last_failure_reason.clone()
    }

    #[must_use]
    pub fn metrics(&self) -> BreakerMetrics {
        let mut state = self.state.lock();
        self.maybe_half_open(&mut state);
        let (failure_rate, slow_call_rate) = state.rates(&self.config);

        BreakerMetrics {
            state: state.state,
            buffered_calls: state.window.len(),
            failed_calls: state.window.iter().filter(|o| o.failed).count(),
            slow_calls: state.window.iter().filter(|o| o.slow).count(),
            failure_rate,
            slow_call_rate,
        }
    }

    /// Time left before an open circuit allows trial calls.
    #[must_use]
    pub fn time_until_half_open(&self) -> Option<Duration> {
        let state = self.state.lock();
        if !state.state.is_open() {
            return None;
        }
        state
            .opened_at
            .map(|opened| self.config.wait_duration_in_open_state.saturating_sub(opened.elapsed()))
    }

    fn maybe_half_open(&self, state: &mut BreakerState) {
        if !state.state.is_open() {
            return;
        }
        let waited = state
            .opened_at
            .is_some_and(|opened| opened.elapsed() >= self.config.wait_duration_in_open_state);
        if waited {
            info!(service = %self.name, "Circuit breaker half-open - allowing trial calls");
            state.state = CircuitState::HalfOpen;
            state.half_open_permits = 0;
            state.half_open_successes = 0;
        }
    }

    fn record_closed(&self, state: &mut BreakerState, outcome: CallOutcome) {
        state.window.push_back(outcome);
        while state.window.len() > self.config.sliding_window_size.max(1) as usize {
            state.window.pop_front();
        }

        let (failure_rate, slow_call_rate) = state.rates(&self.config);
        let (Some(failure_rate), Some(slow_call_rate)) = (failure_rate, slow_call_rate) else {
            return;
        };

        if failure_rate >= self.config.failure_rate_threshold
            || slow_call_rate >= self.config.slow_call_rate_threshold
        {
            warn!(
                service = %self.name,
                failure_rate,
                slow_call_rate,
                reason = ?state.last_failure_reason,
                "Circuit breaker opened"
            );
            state.open();
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state.lock().state)
            .finish()
    }
}
