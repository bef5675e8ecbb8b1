use crate::authorization::AuthorizationRequest;
use crate::error::{AppError, Result};
use rust_decimal::Decimal;

/// Business validation applied to requests that are not replays.
pub trait RequestValidator: Send + Sync {
    fn validate(&self, request: &AuthorizationRequest) -> Result<()>;
}

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: &str) -> Self {
        Self {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

/// Field checks every authorizer expects.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicRequestValidator;

impl BasicRequestValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn check(&self, request: &AuthorizationRequest) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if request.merchant_id.trim().is_empty() {
            errors.push(ValidationError::new(
                "merchant_id",
                "merchant_id cannot be empty",
            ));
        }
        if request.amount <= Decimal::ZERO {
            errors.push(ValidationError::new("amount", "amount must be positive"));
        }
        if request.currency.len() != 3 || !request.currency.chars().all(|c| c.is_ascii_uppercase())
        {
            errors.push(ValidationError::new(
                "currency",
                "currency must be a 3-letter ISO 4217 code",
            ));
        }
        if request.payment_token.trim().is_empty() {
            errors.push(ValidationError::new(
                "payment_token",
                "payment_token cannot be empty",
            ));
        }
        errors
    }
}

impl RequestValidator for BasicRequestValidator {
    fn validate(&self, request: &AuthorizationRequest) -> Result<()> {
        let errors = self.check(request);
        if errors.is_empty() {
            return Ok(());
        }

        let message = errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(AppError::InvalidArgument(message))
    }
}
