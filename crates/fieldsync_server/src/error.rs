//! Error types for the sync service.

use thiserror::Error;

/// Result type for service operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync service.
///
/// Version conflicts are deliberately NOT errors: the bulk endpoint
/// reports them per item and the single-item endpoints return a typed
/// conflict reply, both carrying the server's current state.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The addressed record does not exist.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Internal service error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::AuthenticationFailed(_)
                | ServerError::NotFound(_)
        )
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) => 400,
            ServerError::AuthenticationFailed(_) => 401,
            ServerError::NotFound(_) => 404,
            ServerError::Internal(_) => 500,
        }
    }
}
