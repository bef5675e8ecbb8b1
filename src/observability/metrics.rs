use crate::error::{AppError, Result};
use crate::resilience::CircuitState;
use anyhow::anyhow;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Global metrics instance.
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Metrics collector for the authorization engine.
///
/// Recording is a no-op until a recorder is installed with [`init_metrics`].
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    _private: (),
}

impl Metrics {
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// `outcome` is `approved`, `declined` or an error kind.
    pub fn record_authorization(&self, outcome: &str) {
        counter!("authorization_requests_total", "outcome" => outcome.to_string()).increment(1);
    }

    pub fn record_transport_latency(&self, target: &str, duration_ms: f64, success: bool) {
        histogram!(
            "authorization_transport_duration_ms",
            "target" => target.to_string(),
            "success" => success.to_string()
        )
        .record(duration_ms);
    }

    /// `result` is `hit`, `miss`, `conflict` or `disabled`.
    pub fn record_idempotency_lookup(&self, result: &str) {
        counter!("idempotency_lookups_total", "result" => result.to_string()).increment(1);
    }

    pub fn record_idempotency_cleanup(&self, removed: u64) {
        counter!("idempotency_records_expired_total").increment(removed);
    }

    pub fn record_retry(&self, target: &str) {
        counter!("resilience_retries_total", "target" => target.to_string()).increment(1);
    }

    pub fn record_circuit_transition(&self, target: &str, to: CircuitState) {
        counter!(
            "circuit_breaker_transitions_total",
            "target" => target.to_string(),
            "to" => to.as_str()
        )
        .increment(1);
    }

    /// Gauge value: 0 closed, 1 half-open, 2 open.
    pub fn set_circuit_state(&self, target: &str, state: CircuitState) {
        let value = match state {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        };
        gauge!("circuit_breaker_state", "target" => target.to_string()).set(value);
    }
}

/// Timer for measuring operation latency.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the Prometheus recorder once and returns its handle.
pub fn init_metrics() -> Result<PrometheusHandle> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| AppError::Internal(anyhow!("Failed to install Prometheus recorder: {}", e)))?;
    describe_metrics();

    let handle = METRICS_HANDLE.get_or_init(|| handle).clone();
    METRICS.get_or_init(Metrics::new);

    Ok(handle)
}

fn describe_metrics() {
    describe_counter!("authorization_requests_total", Unit::Count, "Authorization outcomes by result");
    describe_histogram!(
        "authorization_transport_duration_ms",
        Unit::Milliseconds,
        "Outbound authorization latency including retries"
    );

    describe_counter!("idempotency_lookups_total", Unit::Count, "Idempotency lookups by result");
    describe_counter!("idempotency_records_expired_total", Unit::Count, "Expired idempotency records removed");

    describe_counter!("resilience_retries_total", Unit::Count, "Retries scheduled per target");
    describe_counter!("circuit_breaker_transitions_total", Unit::Count, "Circuit state transitions");
    describe_gauge!("circuit_breaker_state", Unit::Count, "Circuit state (0 closed, 1 half-open, 2 open)");
}

/// Returns the global metrics instance.
pub fn get_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}
