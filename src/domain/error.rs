//! Error taxonomy shared by every layer.
//!
//! The top-level kinds map one-to-one onto the behaviour callers branch on:
//! `NotFound` means "nothing to do", `AlreadyExists` is swallowed by session
//! managers as idempotent success, `InvalidState` is surfaced untouched and
//! never retried, and the dependency/connection families are retryable.

use thiserror::Error;

/// Main application error type
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Blockchain error: {0}")]
    Blockchain(#[from] BlockchainError),

    #[error("External service error: {0}")]
    ExternalService(#[from] ExternalServiceError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Transient failures worth another attempt with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Blockchain(e) => e.is_transient(),
            Self::ExternalService(e) => e.is_transient(),
            Self::Database(DatabaseError::Connection(_)) => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Database(DatabaseError::NotFound(_)))
    }

    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            Self::AlreadyExists(_) | Self::Database(DatabaseError::Duplicate(_))
        )
    }

    #[must_use]
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState(_))
    }

    /// Prefix the error message with the component that produced it.
    ///
    /// The kind is preserved so callers can still branch on it.
    #[must_use]
    pub fn in_component(self, component: &str) -> Self {
        let tag = |msg: String| format!("{}: {}", component, msg);
        match self {
            Self::NotFound(m) => Self::NotFound(tag(m)),
            Self::AlreadyExists(m) => Self::AlreadyExists(tag(m)),
            Self::InvalidState(m) => Self::InvalidState(tag(m)),
            Self::Serialization(m) => Self::Serialization(tag(m)),
            Self::Deserialization(m) => Self::Deserialization(tag(m)),
            Self::Internal(m) => Self::Internal(tag(m)),
            Self::ExternalService(ExternalServiceError::Unavailable(m)) => {
                Self::ExternalService(ExternalServiceError::Unavailable(tag(m)))
            }
            Self::ExternalService(ExternalServiceError::InvalidResponse(m)) => {
                Self::ExternalService(ExternalServiceError::InvalidResponse(tag(m)))
            }
            other => other,
        }
    }
}

/// Request validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("{0}")]
    Multiple(String),
}

/// Chain RPC errors
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("RPC error: {0}")]
    RpcError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl BlockchainError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}

/// Failures of downstream HTTP collaborators (orchestration API, messenger)
#[derive(Debug, Error)]
pub enum ExternalServiceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ExternalServiceError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Unavailable(_) | Self::Timeout(_) | Self::RateLimited(_)
        )
    }
}

/// Persistence errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AppError::Blockchain(BlockchainError::Connection("refused".into())).is_retryable());
        assert!(AppError::Blockchain(BlockchainError::Timeout("slow".into())).is_retryable());
        assert!(!AppError::Blockchain(BlockchainError::RpcError("-32000".into())).is_retryable());
        assert!(
            AppError::ExternalService(ExternalServiceError::Unavailable("503".into()))
                .is_retryable()
        );
        assert!(!AppError::NotFound("job".into()).is_retryable());
        assert!(!AppError::InvalidState("mined".into()).is_retryable());
        assert!(!AppError::Cancelled.is_retryable());
    }

    #[test]
    fn test_in_component_keeps_kind() {
        let err = AppError::InvalidState("job is not pending".into()).in_component("retry-job-tx");
        assert!(err.is_invalid_state());
        assert_eq!(
            err.to_string(),
            "Invalid state: retry-job-tx: job is not pending"
        );

        let err = AppError::NotFound("chain".into()).in_component("chain-session-manager");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_database_kinds_map_to_taxonomy() {
        assert!(AppError::Database(DatabaseError::NotFound("x".into())).is_not_found());
        assert!(AppError::Database(DatabaseError::Duplicate("x".into())).is_already_exists());
        assert!(AppError::Database(DatabaseError::Connection("x".into())).is_retryable());
    }
}
