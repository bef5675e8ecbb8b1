use crate::config::AuthorizerSettings;
use crate::error::{AppError, Result};
use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::time::Duration;

/// Sends one serialized request and returns the serialized response body.
///
/// Connection failures surface as `AppError::Transport { status: None }` and non-2xx
/// replies as `AppError::Transport { status: Some(code) }`. Business declines arrive as
/// successful bodies.
#[async_trait]
pub trait AuthorizationTransport: Send + Sync {
    async fn send(&self, payload: Vec<u8>) -> Result<Vec<u8>>;
}

/// JSON-over-HTTP transport.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(settings: &AuthorizerSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(settings.connect_timeout_ms))
            .build()
            .map_err(|e| AppError::Internal(anyhow!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            api_key: settings.api_key.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AuthorizationTransport for HttpTransport {
    async fn send(&self, payload: Vec<u8>) -> Result<Vec<u8>> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .body(payload);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::transport(e.status().map(|s| s.as_u16()), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AppError::transport(Some(status.as_u16()), message));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AppError::transport(None, format!("Failed to read body: {}", e)))?;

        Ok(body.to_vec())
    }
}
