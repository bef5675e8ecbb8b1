use crate::cancel::CancelToken;
use crate::clock::{Clock, SystemClock};
use crate::config::ResilienceSettings;
use crate::error::{AppError, Result};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::resilience::retry::RetryPolicy;
use crate::resilience::timeout::with_timeout;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Breaker → retry → timeout around one downstream call shape.
///
/// The breaker admits the call once; every attempt inside it (retries included) is
/// individually time-boxed. A call that still fails with a retryable error after its
/// retries counts as one breaker failure.
#[derive(Debug, Clone)]
pub struct ResiliencePolicy {
    attempt_timeout: Duration,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
    clock: Arc<dyn Clock>,
}

impl ResiliencePolicy {
    pub fn new(
        attempt_timeout: Duration,
        retry: RetryPolicy,
        breaker: Arc<CircuitBreaker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            attempt_timeout,
            retry,
            breaker,
            clock,
        }
    }

    pub fn builder(target: impl Into<String>) -> ResiliencePolicyBuilder {
        ResiliencePolicyBuilder::new(target)
    }

    pub fn target(&self) -> &str {
        self.breaker.target()
    }

    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        Arc::clone(&self.breaker)
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    pub async fn execute<T, F, Fut>(&self, cancel: &CancelToken, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = self.breaker.try_acquire()?;
        let target = self.breaker.target();

        let outcome = self
            .retry
            .run(self.clock.as_ref(), cancel, target, || {
                with_timeout(self.attempt_timeout, cancel, operation())
            })
            .await;

        match &outcome {
            Ok(_) => self.breaker.record_success(permit),
            Err(error) if self.retry.is_retryable(error) => {
                tracing::warn!(
                    target_name = %target,
                    "Downstream call failed after retries: {}",
                    error
                );
                self.breaker.record_failure(permit);
            }
            Err(_) => self.breaker.release(permit),
        }

        outcome
    }
}

/// Fluent construction of a [`ResiliencePolicy`].
pub struct ResiliencePolicyBuilder {
    target: String,
    attempt_timeout: Duration,
    retry: RetryPolicy,
    breaker_config: CircuitBreakerConfig,
    breaker: Option<Arc<CircuitBreaker>>,
    clock: Arc<dyn Clock>,
}

impl ResiliencePolicyBuilder {
    pub fn new(target: impl Into<String>) -> Self {
        let settings = ResilienceSettings::default();
        Self {
            target: target.into(),
            attempt_timeout: settings.attempt_timeout(),
            retry: RetryPolicy::from_settings(&settings),
            breaker_config: CircuitBreakerConfig::from_settings(&settings),
            breaker: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn settings(mut self, settings: &ResilienceSettings) -> Self {
        self.attempt_timeout = settings.attempt_timeout();
        self.retry = RetryPolicy::from_settings(settings);
        self.breaker_config = CircuitBreakerConfig::from_settings(settings);
        self
    }

    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_count(mut self, count: u32) -> Self {
        self.retry.retry_count = count;
        self
    }

    pub fn backoff(mut self, base: f64, unit: Duration) -> Self {
        self.retry.backoff_base = base;
        self.retry.backoff_unit = unit;
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    /// Uses an existing breaker (typically from a registry) instead of creating one.
    pub fn shared_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<ResiliencePolicy> {
        if self.attempt_timeout.is_zero() {
            return Err(AppError::InvalidArgument(
                "attempt timeout must be positive".to_string(),
            ));
        }
        if self.breaker.is_none() && self.breaker_config.failure_threshold == 0 {
            return Err(AppError::InvalidArgument(
                "failure threshold must be positive".to_string(),
            ));
        }

        let breaker = match self.breaker {
            Some(breaker) => breaker,
            None => Arc::new(CircuitBreaker::new(
                self.target,
                self.breaker_config,
                Arc::clone(&self.clock),
            )),
        };

        Ok(ResiliencePolicy::new(
            self.attempt_timeout,
            self.retry,
            breaker,
            self.clock,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::resilience::circuit_breaker::CircuitState;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(retry_count: u32, threshold: u32) -> (ResiliencePolicy, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let policy = ResiliencePolicy::builder("acquirer")
            .attempt_timeout(Duration::from_millis(50))
            .retry_count(retry_count)
            .circuit_breaker(CircuitBreakerConfig {
                failure_threshold: threshold,
                break_duration: Duration::from_secs(30),
            })
            .clock(clock.clone())
            .build()
            .unwrap();
        (policy, clock)
    }

    #[tokio::test]
    async fn test_retryable_failures_count_once_per_call() {
        let (policy, _) = policy(2, 2);
        let cancel = CancelToken::new();
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let result: Result<()> = policy
                .execute(&cancel, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(AppError::transport(Some(503), "unavailable"))
                })
                .await;
            assert!(matches!(result, Err(AppError::Transport { .. })));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(policy.breaker().state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_leaves_breaker_untouched() {
        let (policy, _) = policy(2, 1);
        let cancel = CancelToken::new();

        let result: Result<()> = policy
            .execute(&cancel, || async {
                Err(AppError::transport(Some(400), "bad request"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(policy.breaker().state(), CircuitState::Closed);
        assert_eq!(policy.breaker().snapshot().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_timeout_is_retried_and_counted() {
        let (policy, clock) = policy(1, 1);
        let cancel = CancelToken::new();
        let calls = AtomicU32::new(0);

        let result: Result<()> = policy
            .execute(&cancel, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(AppError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(2)]);
        assert_eq!(policy.breaker().state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_cancelled_call_is_not_a_breaker_failure() {
        let (policy, _) = policy(3, 1);
        let cancel = CancelToken::new();
        cancel.cancel();

        let result: Result<()> = policy.execute(&cancel, || async { Ok(()) }).await;

        assert!(matches!(result, Err(AppError::Cancelled)));
        assert_eq!(policy.breaker().state(), CircuitState::Closed);
    }

    #[test]
    fn test_builder_rejects_zero_timeout() {
        let result = ResiliencePolicy::builder("acquirer")
            .attempt_timeout(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(AppError::InvalidArgument(_))));
    }

    #[test]
    fn test_builder_from_settings() {
        let settings = ResilienceSettings {
            retry_count: 0,
            attempt_timeout_ms: 250,
            ..ResilienceSettings::default()
        };
        let policy = ResiliencePolicy::builder("acquirer")
            .settings(&settings)
            .build()
            .unwrap();

        assert_eq!(policy.retry_policy().retry_count, 0);
        assert_eq!(policy.attempt_timeout(), Duration::from_millis(250));
        assert_eq!(policy.target(), "acquirer");
    }
}
