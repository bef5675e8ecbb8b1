pub mod client;
pub mod models;
pub mod transport;

pub use client::{decode_response, AuthorizationClient};
pub use models::{AuthorizationRequest, AuthorizationResponse, AuthorizerRequest, AuthorizerResponse};
pub use transport::{AuthorizationTransport, HttpTransport};
