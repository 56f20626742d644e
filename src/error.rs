//! Error types for matchroom.

use std::time::Duration;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

impl Error {
    /// Whether the caller may retry the same request unchanged.
    ///
    /// Persistence failures never leave partial state behind, so a retry is
    /// always safe. Transport "not found" is a permanent answer, not a blip.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(e) => !matches!(e, DatabaseError::NotFound { .. }),
            Self::Transport(e) => !matches!(e, TransportError::NotFound { .. }),
            Self::Config(_) | Self::Session(_) => false,
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors from the chat-platform transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The referenced message or space no longer exists upstream.
    #[error("{resource} {id} not found on {transport}")]
    NotFound {
        transport: String,
        resource: String,
        id: String,
    },

    #[error("Request to {transport} failed: {reason}")]
    RequestFailed { transport: String, reason: String },

    #[error("Transport {transport} rate limited, retry after {retry_after:?}")]
    RateLimited {
        transport: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {transport}: {reason}")]
    InvalidResponse { transport: String, reason: String },
}

impl TransportError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Session-level errors surfaced to the invoking user.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Question {0} not found in catalog")]
    QuestionNotFound(u32),

    #[error("Letter {letter} is not a choice of question {question_id}")]
    InvalidChoice { question_id: u32, letter: String },

    #[error("User {user_id} has no open room")]
    NoRoom { user_id: String },

    #[error("Session for {user_id} is incomplete ({answered}/{total} answered)")]
    Incomplete {
        user_id: String,
        answered: usize,
        total: usize,
    },
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_failures_are_retryable() {
        let err = Error::from(DatabaseError::Query("disk I/O error".into()));
        assert!(err.is_retryable());
    }

    #[test]
    fn transport_not_found_is_not_retryable() {
        let err = Error::from(TransportError::NotFound {
            transport: "discord".into(),
            resource: "message".into(),
            id: "42".into(),
        });
        assert!(!err.is_retryable());

        let err = Error::from(TransportError::RequestFailed {
            transport: "discord".into(),
            reason: "connection reset".into(),
        });
        assert!(err.is_retryable());
    }

    #[test]
    fn session_errors_are_not_retryable() {
        let err = Error::from(SessionError::QuestionNotFound(99));
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Session error: Question 99 not found in catalog"
        );
    }
}
