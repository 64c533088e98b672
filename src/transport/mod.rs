//! Socket transport capability
//!
//! The lifecycle manager is written against this trait, not a concrete
//! socket. A transport owns framing, handshake, and wire encoding; the
//! manager only needs four things from it: start a connect (completion is
//! signaled through the open listener), report liveness, emit one tagged
//! message with an optional acknowledgement callback, and hand every
//! inbound message to a registered handler as a `(tag, payload)` pair.
//!
//! `tag` and `payload` are the two stable wire field names shared with the
//! server side.

use crate::types::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

mod mock;
mod ws;

pub use mock::{AckMode, ConnectMode, MockTransport, SentFrame};
pub use ws::WsTransport;

/// Invoked once when the transport finishes its connect handshake.
pub type OpenListener = Arc<dyn Fn() + Send + Sync>;

/// Invoked once per inbound message with the decoded `tag` and `payload`.
pub type MessageHandler = Arc<dyn Fn(String, Value) + Send + Sync>;

/// Invoked exactly once when the peer acknowledges an emitted message,
/// with whatever payload the peer attached to the acknowledgement.
pub type AckCallback = Box<dyn FnOnce(Value) + Send + Sync>;

/// An event-based bidirectional socket.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Register the listener fired when a connect attempt succeeds.
    fn set_open_listener(&self, listener: OpenListener);

    /// Register the handler for inbound messages.
    fn on_message(&self, handler: MessageHandler);

    /// Start connecting to `address`. Returns once the attempt is underway;
    /// completion is reported through the open listener, never here.
    async fn connect(&self, address: &str) -> Result<()>;

    /// Liveness probe.
    fn is_open(&self) -> bool;

    /// Send one message. When `ack` is given the peer is asked to confirm
    /// receipt and the callback fires on that confirmation.
    async fn emit(&self, tag: &str, payload: Value, ack: Option<AckCallback>) -> Result<()>;
}
