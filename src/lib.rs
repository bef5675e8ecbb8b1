pub mod authorization;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod observability;
pub mod resilience;
pub mod services;
