use std::time::Duration;

use shared::domain::ThreadRef;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("event channel is not connected")]
    TransportUnavailable,
    #[error("no acknowledgment for {request} within {after:?}")]
    SendTimeout {
        request: &'static str,
        after: Duration,
    },
    #[error("server rejected {request}: {reason}")]
    SendRejected {
        request: &'static str,
        reason: String,
    },
    #[error("{thread:?} is not the focused thread")]
    NotFocused { thread: ThreadRef },
    #[error("unknown thread {0:?}")]
    UnknownThread(ThreadRef),
    #[error("message has neither text nor attachment")]
    EmptyMessage,
    #[error("failed to encode outbound frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("session is closed")]
    Closed,
    #[error("api request failed: {0}")]
    Api(#[from] anyhow::Error),
}

impl SyncError {
    /// Send-level failures are recovered locally by rolling back the
    /// optimistic record; everything else is a caller error.
    pub fn is_send_failure(&self) -> bool {
        matches!(
            self,
            SyncError::TransportUnavailable
                | SyncError::SendTimeout { .. }
                | SyncError::SendRejected { .. }
        )
    }
}
