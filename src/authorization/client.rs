use crate::authorization::models::{
    AuthorizationRequest, AuthorizationResponse, AuthorizerRequest, AuthorizerResponse,
};
use crate::authorization::transport::AuthorizationTransport;
use crate::cancel::CancelToken;
use crate::error::{AppError, Result};
use crate::observability::{get_metrics, mask_payment_token, LatencyTimer};
use crate::resilience::ResiliencePolicy;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Calls the external authorizer through a [`ResiliencePolicy`].
///
/// The policy sees only transport outcomes. Translation of the body happens after the
/// policy returns, so a decline or a malformed body never counts against the breaker.
pub struct AuthorizationClient {
    transport: Arc<dyn AuthorizationTransport>,
    policy: Arc<ResiliencePolicy>,
}

impl AuthorizationClient {
    pub fn new(transport: Arc<dyn AuthorizationTransport>, policy: Arc<ResiliencePolicy>) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &ResiliencePolicy {
        &self.policy
    }

    pub async fn authorize(
        &self,
        request: &AuthorizationRequest,
        cancel: &CancelToken,
    ) -> Result<AuthorizationResponse> {
        let target = self.policy.target();
        let payload = serde_json::to_vec(&AuthorizerRequest::from(request))?;

        debug!(
            merchant_id = %request.merchant_id,
            token = %mask_payment_token(&request.payment_token),
            "Sending authorization request"
        );

        let timer = LatencyTimer::new();
        let sent = self
            .policy
            .execute(cancel, || self.transport.send(payload.clone()))
            .await;
        get_metrics().record_transport_latency(target, timer.elapsed_ms(), sent.is_ok());

        let outcome = sent.and_then(|body| decode_response(&body));
        match &outcome {
            Ok(response) if response.authorized => {
                info!(merchant_id = %request.merchant_id, "Authorization approved");
                get_metrics().record_authorization("approved");
            }
            Ok(response) => {
                info!(
                    merchant_id = %request.merchant_id,
                    decline_code = ?response.decline_code,
                    "Authorization declined"
                );
                get_metrics().record_authorization("declined");
            }
            Err(error) => {
                warn!(
                    merchant_id = %request.merchant_id,
                    kind = error.kind().as_str(),
                    "Authorization failed: {}",
                    error
                );
                get_metrics().record_authorization(error.kind().as_str());
            }
        }

        outcome
    }
}

/// Empty, `null`, unparseable and all-absent bodies are rejected.
pub fn decode_response(body: &[u8]) -> Result<AuthorizationResponse> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(AppError::InvalidResponse("empty response body".to_string()));
    }

    let wire: Option<AuthorizerResponse> = serde_json::from_slice(body)
        .map_err(|e| AppError::InvalidResponse(format!("malformed response body: {}", e)))?;
    let wire =
        wire.ok_or_else(|| AppError::InvalidResponse("null response body".to_string()))?;

    if wire.is_zero_value() {
        return Err(AppError::InvalidResponse(
            "response body carries no fields".to_string(),
        ));
    }

    wire.into_domain()
}
