pub mod authorization_service;
pub mod validation;

pub use authorization_service::{AuthorizationOutcome, AuthorizationService};
pub use validation::{BasicRequestValidator, RequestValidator, ValidationError};
