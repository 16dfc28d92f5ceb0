//! Call-related error types.

use thiserror::Error;

/// Errors surfaced by call session operations.
///
/// Every fatal category resets the session to idle and is rendered into the
/// snapshot's `error` field. `IceApplyFailed` is the one non-fatal category:
/// it is recorded without tearing the session down.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("another call in progress")]
    CallInProgress,

    #[error("media access denied: {0}")]
    MediaAccessDenied(String),

    #[error("signaling unavailable: {0}")]
    SignalingUnavailable(String),

    #[error("call declined by remote peer")]
    RemoteRejected,

    #[error("call ended by remote peer: {0}")]
    RemoteEnded(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("failed to apply remote candidate: {0}")]
    IceApplyFailed(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<crate::media::MediaError> for CallError {
    fn from(err: crate::media::MediaError) -> Self {
        CallError::MediaAccessDenied(err.to_string())
    }
}

impl From<crate::peer::PeerError> for CallError {
    fn from(err: crate::peer::PeerError) -> Self {
        CallError::Transport(err.to_string())
    }
}
