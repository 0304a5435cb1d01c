//! Error types for the sync engine.

use crate::record::LocalId;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error (timeout, connection refused, 5xx).
    /// Retried with backoff at whole-batch granularity.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Malformed payload or request; fatal for the item, never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Expired or missing credential. The sync cycle pauses entirely
    /// until the host re-authenticates; queued work is never dropped.
    #[error("authentication required: {0}")]
    Auth(String),

    /// Local storage exhausted. Blocks further enqueue until the host
    /// intervenes.
    #[error("local storage quota exhausted: {0}")]
    Quota(String),

    /// Record store failure.
    #[error("record store error: {0}")]
    Store(String),

    /// Invalid message format or unexpected response shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The referenced record does not exist locally.
    #[error("unknown local record: {0}")]
    RecordNotFound(LocalId),

    /// A sync cycle is already in progress (single-flight guard).
    #[error("a sync cycle is already in progress")]
    CycleInProgress,

    /// The coordinator is paused awaiting re-authentication.
    #[error("sync paused awaiting re-authentication")]
    PausedForAuth,

    /// Sync was cancelled by the host.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the whole batch can be retried after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            _ => false,
        }
    }
}
