//! Error kinds surfaced by the core (see spec §7 "Error Handling Design").
//!
//! Hot-path write failures never propagate through this type — they land in
//! per-target statistics instead (see [`crate::stats`]). `ElogError` is for
//! configuration-time and control-plane calls: `configure*`, `defineSource`,
//! `updateLevels`, and friends.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ElogError>;

/// Error kinds surfaced by the core.
#[derive(Debug, Error)]
pub enum ElogError {
    /// Unknown source name, bad regex, malformed config value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Duplicate initialize, operation on a stopped target, double-terminate.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Target slot cap reached, pre-init buffer full, thread-slot pool exhausted.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// File open/close/write/flush failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Deserialized message failed a schema check.
    #[error("data corrupt: {0}")]
    DataCorrupt(String),

    /// Unexpected message id or out-of-range field in wire framing.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// A send/shutdown timer expired.
    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// A remote collector replied with a non-zero status code.
    #[error("server error: status={status} message={message}")]
    ServerError {
        /// Remote status code.
        status: i32,
        /// Remote status message.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_argument_displays_message() {
        let err = ElogError::InvalidArgument("bad regex".to_string());
        assert_eq!(err.to_string(), "invalid argument: bad regex");
    }

    #[test]
    fn io_error_wraps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: ElogError = io.into();
        assert!(matches!(err, ElogError::IoError(_)));
    }

    #[test]
    fn server_error_carries_status_and_message() {
        let err = ElogError::ServerError { status: 503, message: "unavailable".into() };
        assert_eq!(err.to_string(), "server error: status=503 message=unavailable");
    }
}
