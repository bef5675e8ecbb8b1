use crate::authorization::{AuthorizationClient, AuthorizationRequest, AuthorizationResponse};
use crate::cancel::CancelToken;
use crate::error::Result;
use crate::idempotency::IdempotencyCoordinator;
use crate::services::validation::RequestValidator;
use std::sync::Arc;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

/// Result of one authorization call.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationOutcome {
    pub response: AuthorizationResponse,
    /// True when the response was served from the idempotency store.
    pub replayed: bool,
    pub fingerprint: String,
}

/// Idempotent, resilient payment authorization.
///
/// Replays short-circuit before validation and before any outbound call. New requests
/// are validated, sent through the [`AuthorizationClient`], and the response (approval or
/// decline) is cached under the idempotency key. Errors are never cached.
pub struct AuthorizationService {
    coordinator: Arc<IdempotencyCoordinator>,
    client: Arc<AuthorizationClient>,
    validator: Arc<dyn RequestValidator>,
}

impl AuthorizationService {
    pub fn new(
        coordinator: Arc<IdempotencyCoordinator>,
        client: Arc<AuthorizationClient>,
        validator: Arc<dyn RequestValidator>,
    ) -> Self {
        Self {
            coordinator,
            client,
            validator,
        }
    }

    pub fn coordinator(&self) -> Arc<IdempotencyCoordinator> {
        Arc::clone(&self.coordinator)
    }

    pub async fn authorize(
        &self,
        idempotency_key: Option<&str>,
        request: &AuthorizationRequest,
        cancel: &CancelToken,
    ) -> Result<AuthorizationOutcome> {
        let span = info_span!(
            "authorize",
            correlation_id = %Uuid::new_v4(),
            merchant_id = %request.merchant_id,
        );

        async move {
            let result = self
                .coordinator
                .execute(idempotency_key, request, || async {
                    self.validator.validate(request)?;
                    self.client.authorize(request, cancel).await
                })
                .await?;

            info!(
                replayed = result.replayed,
                authorized = result.value.authorized,
                "Authorization completed"
            );

            Ok(AuthorizationOutcome {
                response: result.value,
                replayed: result.replayed,
                fingerprint: result.fingerprint,
            })
        }
        .instrument(span)
        .await
    }
}
