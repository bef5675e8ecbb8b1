use crate::cancel::CancelToken;
use crate::error::{AppError, Result};
use std::future::Future;
use std::time::Duration;

/// Bounds a single attempt. Exceeding `limit` aborts the attempt with `AppError::Timeout`;
/// cancellation aborts it with `AppError::Cancelled`.
pub async fn with_timeout<T, Fut>(limit: Duration, cancel: &CancelToken, attempt: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        outcome = tokio::time::timeout(limit, attempt) => match outcome {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(limit)),
        },
    }
}
