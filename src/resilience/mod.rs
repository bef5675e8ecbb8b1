//! Resilience subsystem.
//!
//! ```text
//! execute(operation)
//!     → circuit_breaker.rs (fail fast while open, admit one probe when half-open)
//!     → retry.rs (retry transient failures with exponential backoff)
//!     → timeout.rs (bound each attempt)
//!     → operation
//! ```

pub mod circuit_breaker;
pub mod policy;
pub mod retry;
pub mod timeout;

pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitSnapshot,
    CircuitState,
};
pub use policy::{ResiliencePolicy, ResiliencePolicyBuilder};
pub use retry::RetryPolicy;
pub use timeout::with_timeout;
