use crate::error::{AppError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

/// Payment authorization requested by a merchant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub merchant_id: String,
    /// Serialized without trailing zeros, so `10.0` and `10.00` fingerprint alike.
    #[serde(serialize_with = "serialize_normalized")]
    pub amount: Decimal,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Tokenized payment instrument; never logged unmasked.
    pub payment_token: String,
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl AuthorizationRequest {
    pub fn new(
        merchant_id: impl Into<String>,
        amount: Decimal,
        currency: impl Into<String>,
        payment_token: impl Into<String>,
    ) -> Self {
        Self {
            merchant_id: merchant_id.into(),
            amount,
            currency: currency.into(),
            payment_token: payment_token.into(),
            reference: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

fn serialize_normalized<S: Serializer>(
    amount: &Decimal,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    Serialize::serialize(&amount.normalize(), serializer)
}

/// Authorizer decision. A decline is a valid outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationResponse {
    pub authorized: bool,
    /// Present only when `authorized` is true.
    pub authorization_code: Option<String>,
    pub decline_code: Option<String>,
    pub decline_reason: Option<String>,
    pub authorizer_reference: Option<String>,
}

impl AuthorizationResponse {
    pub fn approved(authorization_code: impl Into<String>) -> Self {
        Self {
            authorized: true,
            authorization_code: Some(authorization_code.into()),
            decline_code: None,
            decline_reason: None,
            authorizer_reference: None,
        }
    }

    pub fn declined(decline_code: Option<String>, decline_reason: Option<String>) -> Self {
        Self {
            authorized: false,
            authorization_code: None,
            decline_code,
            decline_reason,
            authorizer_reference: None,
        }
    }

    pub fn is_decline(&self) -> bool {
        !self.authorized
    }
}

/// Request body expected by the authorizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizerRequest {
    pub merchant_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub payment_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_reference: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub metadata: BTreeMap<String, String>,
}

impl From<&AuthorizationRequest> for AuthorizerRequest {
    fn from(request: &AuthorizationRequest) -> Self {
        Self {
            merchant_id: request.merchant_id.clone(),
            amount: request.amount,
            currency: request.currency.to_uppercase(),
            payment_token: request.payment_token.clone(),
            merchant_reference: request.reference.clone(),
            metadata: request.metadata.clone(),
        }
    }
}

/// Response body returned by the authorizer. Every field is optional on the wire;
/// `into_domain` decides whether the result is usable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizerResponse {
    pub approved: Option<bool>,
    pub auth_code: Option<String>,
    pub response_code: Option<String>,
    pub message: Option<String>,
    pub transaction_id: Option<String>,
}

impl AuthorizerResponse {
    pub fn is_zero_value(&self) -> bool {
        self == &Self::default()
    }

    pub fn into_domain(self) -> Result<AuthorizationResponse> {
        let approved = self.approved.ok_or_else(|| {
            AppError::InvalidResponse("response carries no approval decision".to_string())
        })?;

        let mut response = if approved {
            let code = self
                .auth_code
                .filter(|code| !code.trim().is_empty())
                .ok_or_else(|| {
                    AppError::InvalidResponse(
                        "approved response is missing an authorization code".to_string(),
                    )
                })?;
            AuthorizationResponse::approved(code)
        } else {
            AuthorizationResponse::declined(self.response_code, self.message)
        };

        response.authorizer_reference = self.transaction_id;
        Ok(response)
    }
}
