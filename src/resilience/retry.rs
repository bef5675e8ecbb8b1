use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::config::ResilienceSettings;
use crate::error::{AppError, Result};
use crate::observability::get_metrics;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry with exponential backoff: the delay before retry `n` (starting at 1) is
/// `backoff_unit * backoff_base^n`, capped at `max_backoff`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub retry_count: u32,
    pub backoff_base: f64,
    pub backoff_unit: Duration,
    pub max_backoff: Duration,
    /// HTTP statuses treated as transient in addition to connection-level failures.
    pub transient_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&ResilienceSettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &ResilienceSettings) -> Self {
        Self {
            retry_count: settings.retry_count,
            backoff_base: settings.backoff_base,
            backoff_unit: Duration::from_millis(settings.backoff_unit_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            transient_statuses: settings.transient_statuses.clone(),
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.backoff_base.powi(exponent);
        let seconds = self.backoff_unit.as_secs_f64() * factor;

        match Duration::try_from_secs_f64(seconds) {
            Ok(delay) if self.max_backoff.is_zero() => delay,
            Ok(delay) => delay.min(self.max_backoff),
            Err(_) => self.max_backoff,
        }
    }

    /// Connection failures, timeouts and designated statuses are retryable. Everything
    /// else (including cancellation and malformed responses) propagates immediately.
    pub fn is_retryable(&self, error: &AppError) -> bool {
        match error {
            AppError::Timeout(_) => true,
            AppError::Transport { status: None, .. } => true,
            AppError::Transport {
                status: Some(status),
                ..
            } => self.transient_statuses.contains(status),
            _ => false,
        }
    }

    /// Invokes `operation` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent. The last error is returned unchanged.
    pub async fn run<T, F, Fut>(
        &self,
        clock: &dyn Clock,
        cancel: &CancelToken,
        target: &str,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if attempt >= self.retry_count || !self.is_retryable(&error) {
                return Err(error);
            }

            attempt += 1;
            let delay = self.delay_for_attempt(attempt);
            warn!(
                target_name = %target,
                attempt,
                retry_count = self.retry_count,
                delay_ms = delay.as_millis() as u64,
                "Retrying after transient failure: {}",
                error
            );
            get_metrics().record_retry(target);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                _ = clock.sleep(delay) => {}
            }
        }
    }
}
