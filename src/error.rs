use std::time::Duration;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AppError>;

/// Coarse classification callers match on instead of concrete variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    Conflict,
    NotFound,
    Transient,
    BrokenCircuit,
    InvalidResponse,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Transient => "transient",
            ErrorKind::BrokenCircuit => "broken_circuit",
            ErrorKind::InvalidResponse => "invalid_response",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Idempotency conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transport failure (status {status:?}): {message}")]
    Transport { status: Option<u16>, message: String },

    #[error("Attempt aborted after {0:?}")]
    Timeout(Duration),

    #[error("Circuit for '{target}' is open")]
    BrokenCircuit { target: String },

    #[error("Invalid response from authorizer: {0}")]
    InvalidResponse(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InvalidArgument(_) | AppError::Config(_) => ErrorKind::InvalidArgument,
            AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Transport { .. } | AppError::Timeout(_) => ErrorKind::Transient,
            AppError::BrokenCircuit { .. } => ErrorKind::BrokenCircuit,
            AppError::InvalidResponse(_) => ErrorKind::InvalidResponse,
            AppError::Cancelled => ErrorKind::Cancelled,
            AppError::Database(_)
            | AppError::Redis(_)
            | AppError::Serialization(_)
            | AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn transport(status: Option<u16>, message: impl Into<String>) -> Self {
        AppError::Transport {
            status,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_and_timeout_are_transient() {
        assert_eq!(AppError::transport(None, "reset").kind(), ErrorKind::Transient);
        assert_eq!(AppError::transport(Some(503), "down").kind(), ErrorKind::Transient);
        assert!(AppError::Timeout(Duration::from_millis(10)).is_transient());
    }

    #[test]
    fn test_local_errors_are_not_transient() {
        assert!(!AppError::InvalidArgument("x".into()).is_transient());
        assert!(!AppError::Cancelled.is_transient());
        assert_eq!(
            AppError::BrokenCircuit { target: "acquirer".into() }.kind(),
            ErrorKind::BrokenCircuit
        );
    }

    #[test]
    fn test_error_display() {
        let err = AppError::BrokenCircuit { target: "acquirer".into() };
        assert_eq!(err.to_string(), "Circuit for 'acquirer' is open");
        assert_eq!(ErrorKind::Conflict.as_str(), "conflict");
    }
}
