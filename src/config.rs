//! Tunables for a connection manager
//!
//! Defaults reproduce the behavior the protocol was designed around:
//! five second waits for handshake and acknowledgement, a half second idle
//! poll, and immediate retry of a timed out head request.

use std::time::Duration;

/// Configuration for a [`Connection`](crate::Connection).
#[derive(Debug, Clone)]
pub struct TetherConfig {
    /// Bounded wait for the transport open event after `connect`.
    pub handshake_timeout: Duration,
    /// Bounded wait for the peer acknowledgement of a single request.
    pub ack_timeout: Duration,
    /// Drain loop sleep while the queue is empty or the link is down.
    pub idle_poll: Duration,
    /// Pause before retrying a head request whose acknowledgement timed
    /// out. `None` retries on the next loop iteration with no pause.
    pub retry_backoff: Option<Duration>,
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_millis(5000),
            ack_timeout: Duration::from_millis(5000),
            idle_poll: Duration::from_millis(500),
            retry_backoff: None,
        }
    }
}
