use thiserror::Error;

use crate::rate_limit::RateLimitInfo;

/// Errors from the shared key-value store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store query failed: {0}")]
    Query(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors related to session operations.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// Missing, closed, or lazily expired.
    #[error("session '{0}' not found")]
    NotFound(String),

    #[error("session '{session_id}' does not belong to user '{user_id}'")]
    Forbidden { session_id: String, user_id: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors related to live connections.
#[derive(Debug, Clone, Error)]
pub enum RealtimeError {
    #[error("connection '{0}' not found")]
    ConnectionNotFound(String),

    #[error("connection is not authenticated")]
    NotAuthenticated,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("connection limit of {0} reached")]
    CapacityExceeded(usize),
}

/// Rejection from the rate limiter.
#[derive(Debug, Clone, Error)]
pub enum RateLimitError {
    #[error("rate limit exceeded: {} requests per {}s", .0.limit, .0.window)]
    Exceeded(RateLimitInfo),
}

/// Errors verifying a client-presented token.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("invalid token")]
    InvalidToken,

    #[error("missing token")]
    MissingToken,
}

/// Errors handling one inbound chat message.
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Realtime(#[from] RealtimeError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("message store error: {0}")]
    Store(#[from] StoreError),
}

impl OrchestratorError {
    /// Error code sent to the client in an `error` event.
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::Realtime(RealtimeError::ConnectionNotFound(_)) => "CONNECTION_NOT_FOUND",
            OrchestratorError::Realtime(RealtimeError::NotAuthenticated) => "NOT_AUTHENTICATED",
            OrchestratorError::Realtime(_) => "VALIDATION_ERROR",
            OrchestratorError::Session(SessionError::NotFound(_)) => "SESSION_NOT_FOUND",
            OrchestratorError::Session(SessionError::Forbidden { .. }) => "ACCESS_DENIED",
            OrchestratorError::Session(SessionError::Store(_)) | OrchestratorError::Store(_) => {
                "MESSAGE_ERROR"
            }
        }
    }
}
