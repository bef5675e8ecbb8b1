pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{ComponentHealth, HealthChecker, HealthReport, HealthStatus, STORE_COMPONENT};
pub use logging::{init_logging, mask_payment_token, mask_sensitive};
pub use metrics::{get_metrics, init_metrics, LatencyTimer, Metrics, METRICS};
