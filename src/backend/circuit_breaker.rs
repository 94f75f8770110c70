//! Circuit breaker in front of the search backend.
//!
//! ```text
//!  ┌────────┐  failures ≥ threshold   ┌──────┐
//!  │ Closed │ ──────────────────────► │ Open │ ◄─────────┐
//!  └────────┘                         └──┬───┘           │
//!      ▲                                 │ open_duration │ any failure
//!      │ successes ≥ threshold           ▼               │
//!      │                            ┌──────────┐         │
//!      └─────────────────────────── │ HalfOpen │ ────────┘
//!                                   └──────────┘
//! ```
//!
//! Only transport failures and 5xx responses count as failures; a 4xx from the
//! backend is the client's problem and leaves the breaker alone.
//!
//! State sits behind a `std::sync::Mutex`: every critical section is a few
//! field updates and none of them awaits.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding: 0 = closed, 1 = half-open, 2 = open.
    pub fn gauge_value(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again.
    pub success_threshold: u32,
    /// Time spent open before a probe is let through.
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_duration: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, success_threshold: u32, open_duration: Duration) -> Self {
        Self {
            failure_threshold,
            success_threshold,
            open_duration,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    opened_at: Option<Instant>,
    consecutive_failures: u32,
    consecutive_successes: u32,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    times_opened: AtomicU32,
    requests_rejected: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        metrics::set_circuit_breaker_state(CircuitState::Closed.gauge_value());
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                opened_at: None,
                consecutive_failures: 0,
                consecutive_successes: 0,
            }),
            times_opened: AtomicU32::new(0),
            requests_rejected: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // the guarded data is plain counters, valid even after a panic
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a backend call may proceed. An expired open period moves the
    /// breaker to half-open and admits the caller as a probe.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let expired = inner
                    .opened_at
                    .is_none_or(|at| at.elapsed() >= self.config.open_duration);
                if expired {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.consecutive_successes = 0;
                    info!("Backend circuit half-open, probing");
                    true
                } else {
                    self.requests_rejected.fetch_add(1, Ordering::Relaxed);
                    metrics::record_circuit_breaker_rejection();
                    false
                }
            }
        }
    }

    /// Seconds until an open circuit admits a probe.
    pub fn retry_after(&self) -> Duration {
        let inner = self.lock();
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(at)) => {
                self.config.open_duration.saturating_sub(at.elapsed())
            }
            _ => Duration::ZERO,
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                debug!(
                    consecutive_successes = inner.consecutive_successes,
                    threshold = self.config.success_threshold,
                    "Backend probe succeeded"
                );
                if inner.consecutive_successes >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                    inner.opened_at = None;
                    inner.consecutive_failures = 0;
                    info!("Backend circuit closed after recovery");
                }
            }
            // a call admitted just before the circuit opened
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                debug!(
                    consecutive_failures = inner.consecutive_failures,
                    threshold = self.config.failure_threshold,
                    "Backend call failed"
                );
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.open(&mut inner);
                    warn!(
                        failures = inner.consecutive_failures,
                        open_duration = ?self.config.open_duration,
                        "Backend circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                self.open(&mut inner);
                inner.consecutive_successes = 0;
                warn!("Backend circuit reopened after failed probe");
            }
            CircuitState::Open => inner.opened_at = Some(Instant::now()),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn times_opened(&self) -> u32 {
        self.times_opened.load(Ordering::Relaxed)
    }

    pub fn requests_rejected(&self) -> u64 {
        self.requests_rejected.load(Ordering::Relaxed)
    }

    /// Open the circuit immediately.
    pub fn force_open(&self) {
        let mut inner = self.lock();
        self.open(&mut inner);
        warn!("Backend circuit forcibly opened");
    }

    fn open(&self, inner: &mut Inner) {
        self.transition(inner, CircuitState::Open);
        inner.opened_at = Some(Instant::now());
        self.times_opened.fetch_add(1, Ordering::Relaxed);
        metrics::record_circuit_breaker_open();
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        inner.state = to;
        metrics::set_circuit_breaker_state(to.gauge_value());
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
