use thiserror::Error;

/// Device-side code meaning "no such object" (schedule id, switch id, ...).
pub const CODE_NOT_FOUND: i64 = -103;

/// Failure of a single RPC round trip.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// Connect failure or timeout; the device may come back.
    #[error("device unreachable: {0}")]
    Unreachable(String),

    /// Non-2xx status, malformed JSON or any other protocol-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The device answered with `code: -103`.
    #[error("not found: {message}")]
    NotFound { message: String },
}

impl RpcError {
    /// `true` for failures that retrying the same call may clear.
    pub fn is_transient(&self) -> bool {
        matches!(self, RpcError::Unreachable(_) | RpcError::Transport(_))
    }

    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            RpcError::Unreachable(e.to_string())
        } else {
            RpcError::Transport(e.to_string())
        }
    }
}
