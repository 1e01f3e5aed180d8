//! Error kinds surfaced by the sandbox transport and session.

use std::time::Duration;

use crate::state::{SessionEvent, SessionStatus};

pub type Result<T, E = McpError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("failed to boot sandbox: {0}")]
    Boot(String),

    #[error("failed to mount files: {0}")]
    Mount(String),

    #[error("dependency install exited with code {code}")]
    Install { code: i32 },

    #[error("failed to spawn {command}: {reason}")]
    Spawn { command: String, reason: String },

    #[error("transport not initialized")]
    NotInitialized,

    #[error("failed to write to server input: {0}")]
    Write(#[from] std::io::Error),

    #[error("tool call timeout (request {id} after {after:?})")]
    Timeout { id: u64, after: Duration },

    #[error("{0}")]
    Remote(String),

    #[error("transport closed")]
    TransportClosed,

    #[error("transport already started")]
    AlreadyStarted,

    #[error("request id {0} is already pending")]
    DuplicateRequestId(u64),

    #[error("invalid session transition: {event:?} while {from}")]
    InvalidTransition {
        from: SessionStatus,
        event: SessionEvent,
    },

    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("unexpected response shape: {0}")]
    Decode(String),
}

impl McpError {
    /// Failures that happen before the server process is live.
    pub fn is_startup_failure(&self) -> bool {
        matches!(
            self,
            Self::Boot(_) | Self::Mount(_) | Self::Install { .. } | Self::Spawn { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_second_timeouts_keep_their_precision() {
        let err = McpError::Timeout {
            id: 7,
            after: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "tool call timeout (request 7 after 250ms)");
    }
}
