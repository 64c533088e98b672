//! In-memory transport for tests and examples
//!
//! Deterministic [`Transport`] double with no network behind it. Connect
//! either completes immediately or never does, acknowledgements are either
//! answered on the spot or held until the test releases them, and every
//! emitted frame is recorded.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::{AckCallback, MessageHandler, OpenListener, Transport};
use crate::types::{Result, TetherError};

/// Connect behavior of the double.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// The open listener fires during the connect call.
    Accept,
    /// The connect attempt never completes.
    Ignore,
}

/// Acknowledgement behavior of the double.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Acknowledge each emit immediately.
    Auto,
    /// Hold callbacks until [`MockTransport::ack_next`] releases them.
    Hold,
}

/// One recorded emit.
#[derive(Debug, Clone)]
pub struct SentFrame {
    pub tag: String,
    pub payload: Value,
    pub wanted_ack: bool,
}

struct MockInner {
    connect_mode: ConnectMode,
    ack_mode: AckMode,
    open: AtomicBool,
    open_listener: Mutex<Option<OpenListener>>,
    message_handler: Mutex<Option<MessageHandler>>,
    sent: Mutex<Vec<SentFrame>>,
    held_acks: Mutex<Vec<AckCallback>>,
}

/// In-memory implementation of [`Transport`].
///
/// Cheap to clone; clones share all state, so a test can hand one clone to
/// a connection manager and drive the peer side through another.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl MockTransport {
    pub fn new(connect_mode: ConnectMode, ack_mode: AckMode) -> Self {
        Self {
            inner: Arc::new(MockInner {
                connect_mode,
                ack_mode,
                open: AtomicBool::new(false),
                open_listener: Mutex::new(None),
                message_handler: Mutex::new(None),
                sent: Mutex::new(Vec::new()),
                held_acks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A peer that accepts connects and acknowledges everything.
    pub fn accepting() -> Self {
        Self::new(ConnectMode::Accept, AckMode::Auto)
    }

    /// A peer that accepts connects but never acknowledges on its own.
    pub fn holding_acks() -> Self {
        Self::new(ConnectMode::Accept, AckMode::Hold)
    }

    /// An address with nothing listening.
    pub fn unreachable() -> Self {
        Self::new(ConnectMode::Ignore, AckMode::Auto)
    }

    /// Frames emitted so far.
    pub fn sent(&self) -> Vec<SentFrame> {
        self.inner.sent.lock().expect("sent log poisoned").clone()
    }

    pub fn sent_count(&self) -> usize {
        self.inner.sent.lock().expect("sent log poisoned").len()
    }

    /// Release the oldest held acknowledgement. Returns false when none
    /// is pending.
    pub fn ack_next(&self) -> bool {
        let callback = {
            let mut held = self.inner.held_acks.lock().expect("held acks poisoned");
            if held.is_empty() {
                return false;
            }
            held.remove(0)
        };
        callback(json!({"ok": true}));
        true
    }

    /// Push an inbound message to the registered handler.
    pub fn inject(&self, tag: &str, payload: Value) {
        let handler = self
            .inner
            .message_handler
            .lock()
            .expect("message handler poisoned")
            .clone();
        if let Some(handler) = handler {
            handler(tag.to_string(), payload);
        }
    }

    /// Simulate the peer dropping the link.
    pub fn close(&self) {
        self.inner.open.store(false, Ordering::Release);
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn set_open_listener(&self, listener: OpenListener) {
        *self
            .inner
            .open_listener
            .lock()
            .expect("open listener poisoned") = Some(listener);
    }

    fn on_message(&self, handler: MessageHandler) {
        *self
            .inner
            .message_handler
            .lock()
            .expect("message handler poisoned") = Some(handler);
    }

    async fn connect(&self, address: &str) -> Result<()> {
        match self.inner.connect_mode {
            ConnectMode::Accept => {
                debug!(%address, "Mock transport accepting connect");
                self.inner.open.store(true, Ordering::Release);
                let listener = self
                    .inner
                    .open_listener
                    .lock()
                    .expect("open listener poisoned")
                    .clone();
                if let Some(listener) = listener {
                    listener();
                }
            }
            ConnectMode::Ignore => {
                debug!(%address, "Mock transport ignoring connect");
            }
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    async fn emit(&self, tag: &str, payload: Value, ack: Option<AckCallback>) -> Result<()> {
        if !self.is_open() {
            return Err(TetherError::NotOpen);
        }

        self.inner
            .sent
            .lock()
            .expect("sent log poisoned")
            .push(SentFrame {
                tag: tag.to_string(),
                payload,
                wanted_ack: ack.is_some(),
            });

        if let Some(callback) = ack {
            match self.inner.ack_mode {
                AckMode::Auto => callback(json!({"ok": true})),
                AckMode::Hold => self
                    .inner
                    .held_acks
                    .lock()
                    .expect("held acks poisoned")
                    .push(callback),
            }
        }

        Ok(())
    }
}
