//! Tether - reliable request delivery over event sockets
//!
//! "A threefold cord is not quickly broken" - Ecclesiastes 4:12
//!
//! Tether sits between an application and an event-based socket (connect,
//! emit, on-message, acknowledgements) and adds the guarantees the raw
//! transport does not give: connection establishment with a bounded wait,
//! an ordered outgoing queue that survives disconnects, and per-request
//! acknowledgement waits with timeout.
//!
//! ## Modules
//!
//! - **connection**: the lifecycle manager - state machine, drain loop,
//!   send-with-ack protocol
//! - **request**: the ordered, tag-deduplicated request queue
//! - **sink**: delivery of inbound messages to the caller (collected vector
//!   or callback)
//! - **transport**: the socket capability trait plus the WebSocket and
//!   in-memory implementations
//! - **config**: tunables (timeouts, poll interval, retry backoff)

pub mod config;
pub mod connection;
pub mod request;
pub mod sink;
pub mod transport;
pub mod types;

pub use config::TetherConfig;
pub use connection::{Connection, ConnectionState};
pub use sink::{shared_results, MessageCallback, SharedResults};
pub use transport::{MockTransport, Transport, WsTransport};
pub use types::{Result, Status, TetherError};
