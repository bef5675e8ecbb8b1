use crate::cancel::CancelToken;
use crate::config::IdempotencySettings;
use crate::error::{AppError, Result};
use crate::idempotency::fingerprint::{IdempotencyKey, RequestFingerprinter};
use crate::idempotency::storage::IdempotencyStore;
use crate::observability::{get_metrics, mask_sensitive};
use anyhow::anyhow;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Metrics for idempotency handling.
#[derive(Debug, Default)]
pub struct IdempotencyMetrics {
    pub total_requests: AtomicU64,
    pub replayed_requests: AtomicU64,
    pub new_requests: AtomicU64,
    pub disabled_requests: AtomicU64,
    pub conflicts: AtomicU64,
    pub saved_responses: AtomicU64,
}

impl IdempotencyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replay(&self) {
        self.replayed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_new(&self) {
        self.new_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disabled(&self) {
        self.disabled_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_saved(&self) {
        self.saved_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            replayed_requests: self.replayed_requests.load(Ordering::Relaxed),
            new_requests: self.new_requests.load(Ordering::Relaxed),
            disabled_requests: self.disabled_requests.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            saved_responses: self.saved_responses.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub replayed_requests: u64,
    pub new_requests: u64,
    pub disabled_requests: u64,
    pub conflicts: u64,
    pub saved_responses: u64,
}

impl MetricsSnapshot {
    pub fn replay_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.replayed_requests as f64 / self.total_requests as f64
        }
    }
}

/// Outcome of a cache lookup.
///
/// `cached` is `Some` only on the replay path. `key` is `None` when idempotency was
/// disabled by a blank key; the fingerprint is always computed.
#[derive(Debug, Clone)]
pub struct CacheLookup<T> {
    pub cached: Option<T>,
    pub fingerprint: String,
    pub key: Option<IdempotencyKey>,
}

impl<T> CacheLookup<T> {
    pub fn is_replay(&self) -> bool {
        self.cached.is_some()
    }
}

/// A value produced either by running the operation or by replaying a cached response.
#[derive(Debug, Clone, PartialEq)]
pub struct Idempotent<T> {
    pub value: T,
    pub replayed: bool,
    pub fingerprint: String,
}

/// Deduplicates retried requests against an [`IdempotencyStore`].
///
/// Two concurrent first-time requests with the same key may both observe a miss and both
/// run the side effect; the store offers no reservation primitive.
pub struct IdempotencyCoordinator {
    store: Arc<dyn IdempotencyStore>,
    fingerprinter: RequestFingerprinter,
    metrics: Arc<IdempotencyMetrics>,
    default_ttl: Duration,
}

impl IdempotencyCoordinator {
    pub fn new(store: Arc<dyn IdempotencyStore>, settings: &IdempotencySettings) -> Self {
        Self {
            store,
            fingerprinter: RequestFingerprinter::new(),
            metrics: Arc::new(IdempotencyMetrics::new()),
            default_ttl: settings.default_ttl(),
        }
    }

    pub fn metrics(&self) -> Arc<IdempotencyMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn store(&self) -> Arc<dyn IdempotencyStore> {
        Arc::clone(&self.store)
    }

    /// Looks up a cached response for `key`.
    ///
    /// A matching fingerprint returns the cached response; the caller must not repeat the
    /// side effect. A differing fingerprint fails with `Conflict`.
    pub async fn try_get_cached<Req, Resp>(
        &self,
        request: &Req,
        key: Option<&str>,
    ) -> Result<CacheLookup<Resp>>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        self.metrics.record_request();
        let fingerprint = self.fingerprinter.fingerprint(request)?;

        let key = match IdempotencyKey::parse(key)? {
            Some(key) => key,
            None => {
                self.metrics.record_disabled();
                get_metrics().record_idempotency_lookup("disabled");
                return Ok(CacheLookup {
                    cached: None,
                    fingerprint,
                    key: None,
                });
            }
        };

        match self.store.get(key.as_str()).await {
            Err(AppError::NotFound(_)) => {
                self.metrics.record_new();
                get_metrics().record_idempotency_lookup("miss");
                Ok(CacheLookup {
                    cached: None,
                    fingerprint,
                    key: Some(key),
                })
            }
            Err(e) => Err(e),
            Ok(record) if record.fingerprint == fingerprint => {
                let response: Resp = serde_json::from_value(record.response).map_err(|e| {
                    AppError::Internal(anyhow!("Failed to deserialize cached response: {}", e))
                })?;

                self.metrics.record_replay();
                get_metrics().record_idempotency_lookup("hit");
                tracing::info!(
                    idempotency_key = %mask_sensitive(key.as_str(), 4),
                    "Replaying cached response"
                );

                Ok(CacheLookup {
                    cached: Some(response),
                    fingerprint,
                    key: Some(key),
                })
            }
            Ok(_) => {
                self.metrics.record_conflict();
                get_metrics().record_idempotency_lookup("conflict");
                tracing::warn!(
                    idempotency_key = %mask_sensitive(key.as_str(), 4),
                    "Idempotency key reused with a different payload"
                );

                Err(AppError::Conflict(
                    "same key reused with a different payload".to_string(),
                ))
            }
        }
    }

    /// Persists the response of a successfully processed request.
    ///
    /// Saving again with the same fingerprint is a no-op; a different fingerprint under an
    /// unexpired key fails with `Conflict`. `ttl` falls back to the configured default.
    pub async fn save<Resp>(
        &self,
        key: &str,
        response: &Resp,
        fingerprint: &str,
        ttl: Option<Duration>,
    ) -> Result<()>
    where
        Resp: Serialize + ?Sized,
    {
        let key = IdempotencyKey::parse(Some(key))?.ok_or_else(|| {
            AppError::InvalidArgument("idempotency key cannot be empty".to_string())
        })?;
        if fingerprint.trim().is_empty() {
            return Err(AppError::InvalidArgument(
                "fingerprint cannot be empty".to_string(),
            ));
        }

        let value = serde_json::to_value(response)?;
        if value.is_null() {
            return Err(AppError::InvalidArgument(
                "response cannot be null".to_string(),
            ));
        }

        match self.store.get(key.as_str()).await {
            Ok(existing) if existing.fingerprint == fingerprint => {
                tracing::debug!(
                    idempotency_key = %mask_sensitive(key.as_str(), 4),
                    "Response already saved for key"
                );
                return Ok(());
            }
            Ok(_) => {
                self.metrics.record_conflict();
                return Err(AppError::Conflict(
                    "same key reused with a different payload".to_string(),
                ));
            }
            Err(AppError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        self.store
            .put(
                key.as_str(),
                fingerprint,
                value,
                Some(ttl.unwrap_or(self.default_ttl)),
            )
            .await?;
        self.metrics.record_saved();

        Ok(())
    }

    /// Runs `operation` at most once per (key, request) pair, replaying the cached
    /// response on retries. Failed operations are not cached.
    pub async fn execute<Req, Resp, F, Fut>(
        &self,
        key: Option<&str>,
        request: &Req,
        operation: F,
    ) -> Result<Idempotent<Resp>>
    where
        Req: Serialize + ?Sized,
        Resp: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Resp>>,
    {
        let lookup = self.try_get_cached::<Req, Resp>(request, key).await?;
        if let Some(cached) = lookup.cached {
            return Ok(Idempotent {
                value: cached,
                replayed: true,
                fingerprint: lookup.fingerprint,
            });
        }

        let value = operation().await?;

        if let Some(key) = &lookup.key {
            if let Err(e) = self.save(key.as_str(), &value, &lookup.fingerprint, None).await {
                tracing::error!(
                    idempotency_key = %mask_sensitive(key.as_str(), 4),
                    "Failed to save idempotent response: {}",
                    e
                );
                return Err(e);
            }
        }

        Ok(Idempotent {
            value,
            replayed: false,
            fingerprint: lookup.fingerprint,
        })
    }

    /// Runs cleanup of expired idempotency records.
    pub async fn cleanup_expired(&self) -> Result<u64> {
        self.store.cleanup_expired().await
    }
}

/// Background sweep of expired idempotency records.
pub struct IdempotencyCleanupJob {
    coordinator: Arc<IdempotencyCoordinator>,
    interval: Duration,
}

impl IdempotencyCleanupJob {
    pub fn new(coordinator: Arc<IdempotencyCoordinator>, interval: Duration) -> Self {
        Self {
            coordinator,
            interval,
        }
    }

    /// Runs the cleanup job once.
    pub async fn run_once(&self) -> Result<u64> {
        let removed = self.coordinator.cleanup_expired().await?;
        get_metrics().record_idempotency_cleanup(removed);
        Ok(removed)
    }

    /// Starts the sweep in a background task that exits when `cancel` fires.
    pub fn start(self, cancel: CancelToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match self.run_once().await {
                            Ok(count) => {
                                if count > 0 {
                                    tracing::info!("Cleaned up {} expired idempotency records", count);
                                }
                            }
                            Err(e) => {
                                tracing::error!("Failed to cleanup expired idempotency records: {}", e);
                            }
                        }
                    }
                    _ = cancel.cancelled() => {
                        tracing::info!("Idempotency cleanup job stopping");
                        break;
                    }
                }
            }
        })
    }
}
