//! Status codes and error types
//!
//! Lifecycle operations report a closed set of protocol outcomes with
//! stable numeric codes; several of them are advisory rather than fatal.
//! Genuine transport faults (socket errors, malformed frames) are a
//! separate `TetherError` and never escape the transport layer as panics.

use thiserror::Error;

/// Outcome of a lifecycle operation (connect, enqueue, send).
///
/// The numeric codes are part of the contract with callers that bridge
/// into non-Rust hosts; they must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    /// Operation completed.
    Success = 0,
    /// Not connected. For `add_request` this is advisory: the request was
    /// queued and will be sent once a connection is established.
    NotConnected = 1,
    /// The bounded wait (handshake or acknowledgement) elapsed first.
    TimedOut = 2,
    /// A connect was attempted while a connection is already live.
    AlreadyConnected = 3,
}

impl Status {
    /// Stable numeric code for this outcome.
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// True only for `Success`.
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Success => "success",
            Status::NotConnected => "not connected",
            Status::TimedOut => "timed out",
            Status::AlreadyConnected => "already connected",
        };
        write!(f, "{name}")
    }
}

/// Transport-level errors.
#[derive(Debug, Error)]
pub enum TetherError {
    /// The socket is not open (emit before connect, or after the peer
    /// closed the link).
    #[error("transport is not open")]
    NotOpen,

    /// The connect handshake could not be initiated or completed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// A frame could not be written to the socket.
    #[error("send failed: {0}")]
    Send(String),

    /// A frame could not be encoded or decoded.
    #[error("bad envelope: {0}")]
    Envelope(String),
}

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TetherError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_stable() {
        assert_eq!(Status::Success.code(), 0);
        assert_eq!(Status::NotConnected.code(), 1);
        assert_eq!(Status::TimedOut.code(), 2);
        assert_eq!(Status::AlreadyConnected.code(), 3);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::TimedOut.to_string(), "timed out");
        assert!(Status::Success.is_success());
        assert!(!Status::NotConnected.is_success());
    }
}
