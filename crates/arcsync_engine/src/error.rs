//! Error types for the sync engine.

use arcsync_codec::CodecError;
use arcsync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type returned by [`RemoteGateway`](crate::RemoteGateway) calls.
pub type GatewayResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Most of these never reach callers: boundary failures are logged and
/// turned into "no candidate" where they happen. They are public so gateway
/// implementations can report failures and tests can match on them.
#[derive(Error, Debug)]
pub enum SyncError {
    /// An archive could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The cache store failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// No remote identity is available (signed out, offline, no account).
    #[error("remote identity unavailable")]
    IdentityUnavailable,

    /// A gateway call did not finish in time.
    #[error("remote operation timed out")]
    RemoteTimeout,

    /// The remote rejected or failed the request.
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// Writing the cache failed.
    #[error("persistence write failed: {0}")]
    PersistenceWriteFailed(String),

    /// The engine task has stopped.
    #[error("sync engine stopped")]
    EngineStopped,
}

impl SyncError {
    /// Creates a remote failure with a message.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::RemoteUnavailable(message.into())
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::RemoteTimeout
            | SyncError::RemoteUnavailable(_)
            | SyncError::IdentityUnavailable
            | SyncError::PersistenceWriteFailed(_) => true,
            SyncError::Storage(StorageError::Io(_)) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::RemoteTimeout.is_retryable());
        assert!(SyncError::remote("quota exceeded").is_retryable());
        assert!(SyncError::IdentityUnavailable.is_retryable());
        assert!(SyncError::PersistenceWriteFailed("disk full".into()).is_retryable());
        assert!(!SyncError::EngineStopped.is_retryable());
        assert!(!SyncError::Codec(CodecError::corrupt("bad frame")).is_retryable());
    }

    #[test]
    fn error_display() {
        assert_eq!(SyncError::EngineStopped.to_string(), "sync engine stopped");
        assert_eq!(
            SyncError::remote("offline").to_string(),
            "remote unavailable: offline"
        );
    }

    #[test]
    fn codec_error_converts() {
        fn decode() -> SyncResult<()> {
            Err(CodecError::truncated(8, 2))?;
            Ok(())
        }
        assert!(matches!(decode(), Err(SyncError::Codec(_))));
    }
}
