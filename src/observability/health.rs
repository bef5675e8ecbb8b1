//! Readiness derived from circuit breaker state and idempotency store reachability.
//!
//! ```text
//! Closed    → Healthy
//! HalfOpen  → Degraded   (probe in progress)
//! Open      → Unhealthy  (calls fail fast)
//! ```

use crate::error::AppError;
use crate::idempotency::IdempotencyStore;
use crate::resilience::{CircuitBreakerRegistry, CircuitSnapshot, CircuitState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const STORE_COMPONENT: &str = "idempotency_store";

const STORE_SENTINEL_KEY: &str = "__health_check__";
const STORE_TIMEOUT: Duration = Duration::from_secs(5);
const STORE_SLOW_MS: f64 = 100.0;

/// Ordered from best to worst, so a report's status is the maximum of its components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Degraded still serves traffic.
    pub fn is_serving(&self) -> bool {
        *self != HealthStatus::Unhealthy
    }
}

impl From<CircuitState> for HealthStatus {
    fn from(state: CircuitState) -> Self {
        match state {
            CircuitState::Closed => HealthStatus::Healthy,
            CircuitState::HalfOpen => HealthStatus::Degraded,
            CircuitState::Open => HealthStatus::Unhealthy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub latency_ms: Option<f64>,
    pub detail: Option<String>,
}

impl ComponentHealth {
    pub fn circuit(snapshot: &CircuitSnapshot) -> Self {
        let detail = match snapshot.state {
            CircuitState::Closed if snapshot.consecutive_failures == 0 => None,
            CircuitState::Closed => Some(format!(
                "{} consecutive failures",
                snapshot.consecutive_failures
            )),
            CircuitState::HalfOpen => Some("probe in flight".to_string()),
            CircuitState::Open => Some(format!(
                "open since {}",
                snapshot.last_transition.to_rfc3339()
            )),
        };

        Self {
            name: format!("circuit:{}", snapshot.target),
            status: snapshot.state.into(),
            latency_ms: None,
            detail,
        }
    }

    fn store(status: HealthStatus, latency_ms: Option<f64>, detail: Option<String>) -> Self {
        Self {
            name: STORE_COMPONENT.to_string(),
            status,
            latency_ms,
            detail,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: Vec<ComponentHealth>,
}

impl HealthReport {
    pub fn new(uptime_seconds: u64, components: Vec<ComponentHealth>) -> Self {
        let status = components
            .iter()
            .map(|component| component.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds,
            components,
        }
    }

    pub fn component(&self, name: &str) -> Option<&ComponentHealth> {
        self.components.iter().find(|component| component.name == name)
    }
}

pub struct HealthChecker {
    breakers: Arc<CircuitBreakerRegistry>,
    store: Option<Arc<dyn IdempotencyStore>>,
    started_at: Instant,
}

impl HealthChecker {
    pub fn new(
        breakers: Arc<CircuitBreakerRegistry>,
        store: Option<Arc<dyn IdempotencyStore>>,
    ) -> Self {
        Self {
            breakers,
            store,
            started_at: Instant::now(),
        }
    }

    /// One component per known breaker, then the store when one is configured.
    pub async fn report(&self) -> HealthReport {
        let mut components = self.circuits();
        if let Some(store) = &self.store {
            components.push(check_store(store.as_ref()).await);
        }

        HealthReport::new(self.started_at.elapsed().as_secs(), components)
    }

    pub fn circuits(&self) -> Vec<ComponentHealth> {
        self.breakers
            .snapshots()
            .iter()
            .map(ComponentHealth::circuit)
            .collect()
    }

    pub async fn is_ready(&self) -> bool {
        self.report().await.status.is_serving()
    }
}

/// Reads a key that is never written; `NotFound` means the store answered.
async fn check_store(store: &dyn IdempotencyStore) -> ComponentHealth {
    let started = Instant::now();

    match tokio::time::timeout(STORE_TIMEOUT, store.get(STORE_SENTINEL_KEY)).await {
        Ok(Ok(_)) | Ok(Err(AppError::NotFound(_))) => {
            let latency = started.elapsed().as_secs_f64() * 1000.0;
            if latency > STORE_SLOW_MS {
                ComponentHealth::store(
                    HealthStatus::Degraded,
                    Some(latency),
                    Some("slow lookup".to_string()),
                )
            } else {
                ComponentHealth::store(HealthStatus::Healthy, Some(latency), None)
            }
        }
        Ok(Err(e)) => ComponentHealth::store(
            HealthStatus::Unhealthy,
            None,
            Some(format!("lookup failed: {}", e)),
        ),
        Err(_) => ComponentHealth::store(
            HealthStatus::Unhealthy,
            None,
            Some("lookup timed out".to_string()),
        ),
    }
}
