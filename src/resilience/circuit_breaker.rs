//! Circuit breaker guarding one downstream target.
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_threshold consecutive qualifying failures
//! Open → HalfOpen: first call after break_duration (admitted as the probe)
//! HalfOpen → Closed: probe succeeds
//! HalfOpen → Open: probe fails (break timer restarts)
//! ```
//!
//! Only one probe is admitted while half-open; concurrent callers fail fast.

use crate::clock::Clock;
use crate::config::ResilienceSettings;
use crate::error::{AppError, Result};
use crate::observability::get_metrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub break_duration: Duration,
}

impl CircuitBreakerConfig {
    pub fn from_settings(settings: &ResilienceSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            break_duration: settings.break_duration(),
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from_settings(&ResilienceSettings::default())
    }
}

/// Point-in-time view of a breaker, for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub target: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_transition: DateTime<Utc>,
}

/// Admission ticket returned by [`CircuitBreaker::try_acquire`].
///
/// Settled through `record_success`, `record_failure` or `release`. A permit dropped
/// unsettled (its call future was dropped mid-flight) is released, so an abandoned
/// probe frees the half-open slot.
#[derive(Debug)]
#[must_use]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl CallPermit<'_> {
    pub fn is_probe(&self) -> bool {
        self.probe
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.release_probe();
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_transition: DateTime<Utc>,
    probe_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    target: String,
    failure_threshold: u32,
    break_duration: chrono::Duration,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(target: impl Into<String>, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let target = target.into();
        let break_duration = chrono::Duration::from_std(config.break_duration)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let inner = BreakerInner {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_transition: clock.now(),
            probe_in_flight: false,
        };
        get_metrics().set_circuit_state(&target, CircuitState::Closed);

        Self {
            target,
            failure_threshold: config.failure_threshold.max(1),
            break_duration,
            clock,
            inner: Mutex::new(inner),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            target: self.target.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_transition: inner.last_transition,
        }
    }

    /// Admits a call or fails fast with `BrokenCircuit`.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>> {
        let now = self.clock.now();
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => Ok(self.permit(false)),
            CircuitState::Open => {
                if now >= inner.last_transition + self.break_duration {
                    self.transition(&mut inner, CircuitState::HalfOpen, now);
                    inner.probe_in_flight = true;
                    Ok(self.permit(true))
                } else {
                    Err(self.broken())
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(self.broken())
                } else {
                    inner.probe_in_flight = true;
                    Ok(self.permit(true))
                }
            }
        }
    }

    pub fn record_success(&self, mut permit: CallPermit<'_>) {
        permit.settled = true;
        let now = self.clock.now();
        let mut inner = self.lock();

        match inner.state {
            CircuitState::HalfOpen if permit.probe => {
                inner.probe_in_flight = false;
                inner.consecutive_failures = 0;
                self.transition(&mut inner, CircuitState::Closed, now);
            }
            CircuitState::Closed => inner.consecutive_failures = 0,
            _ => {}
        }
    }

    pub fn record_failure(&self, mut permit: CallPermit<'_>) {
        permit.settled = true;
        let now = self.clock.now();
        let mut inner = self.lock();

        match inner.state {
            CircuitState::HalfOpen if permit.probe => {
                inner.probe_in_flight = false;
                inner.consecutive_failures = 0;
                self.transition(&mut inner, CircuitState::Open, now);
            }
            CircuitState::Closed => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.consecutive_failures = 0;
                    self.transition(&mut inner, CircuitState::Open, now);
                }
            }
            // A call admitted before the breaker tripped; its outcome no longer matters.
            _ => {}
        }
    }

    /// Returns a permit whose outcome neither succeeded nor qualified as a failure
    /// (cancellation, non-retryable errors). A released probe lets the next caller probe.
    pub fn release(&self, mut permit: CallPermit<'_>) {
        permit.settled = true;
        if permit.probe {
            self.release_probe();
        }
    }

    fn release_probe(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    fn permit(&self, probe: bool) -> CallPermit<'_> {
        CallPermit {
            breaker: self,
            probe,
            settled: false,
        }
    }

    /// Forces the breaker closed.
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        inner.probe_in_flight = false;
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed, now);
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState, now: DateTime<Utc>) {
        let from = inner.state;
        inner.state = to;
        inner.last_transition = now;

        if to == CircuitState::Open {
            warn!(
                target_name = %self.target,
                from = from.as_str(),
                break_ms = self.break_duration.num_milliseconds(),
                "Circuit opened"
            );
        } else {
            info!(
                target_name = %self.target,
                from = from.as_str(),
                to = to.as_str(),
                "Circuit state changed"
            );
        }

        let metrics = get_metrics();
        metrics.record_circuit_transition(&self.target, to);
        metrics.set_circuit_state(&self.target, to);
    }

    fn broken(&self) -> AppError {
        AppError::BrokenCircuit {
            target: self.target.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One breaker per downstream target, shared by every policy calling that target.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_or_create(&self, target: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.get(target) {
            return breaker;
        }

        let mut breakers = self.breakers.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(breakers.entry(target.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(
                target,
                self.config.clone(),
                Arc::clone(&self.clock),
            ))
        }))
    }

    pub fn get(&self, target: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target)
            .cloned()
    }

    /// Snapshots of every known breaker, ordered by target name.
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut snapshots: Vec<CircuitSnapshot> = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|breaker| breaker.snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.target.cmp(&b.target));
        snapshots
    }

    /// Forces the breaker for `target` closed. Returns false for an unknown target.
    pub fn reset(&self, target: &str) -> bool {
        match self.get(target) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }
}
