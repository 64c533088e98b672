//! Inbound message delivery
//!
//! Every message the peer pushes down the socket is routed here, tagged.
//! Callers pick one of two modes at connect time: collect mode appends
//! `(tag, payload)` pairs to a shared vector the caller owns and reads at
//! its own pace; notify mode invokes a caller closure per message.

use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Caller-owned, append-only log of inbound `(tag, payload)` pairs.
pub type SharedResults = Arc<Mutex<Vec<(String, Value)>>>;

/// Per-message callback for notify mode.
pub type MessageCallback = Arc<dyn Fn(String, Value) + Send + Sync>;

/// Fresh empty results log for collect mode.
pub fn shared_results() -> SharedResults {
    Arc::new(Mutex::new(Vec::new()))
}

/// Where inbound messages go for one connection.
#[derive(Clone)]
pub enum ResultSink {
    /// Append to a shared vector.
    Collect(SharedResults),
    /// Invoke a closure per message.
    Notify(MessageCallback),
}

impl ResultSink {
    /// Route one inbound message.
    pub fn deliver(&self, tag: String, payload: Value) {
        match self {
            ResultSink::Collect(results) => {
                debug!(%tag, "Collected inbound message");
                results
                    .lock()
                    .expect("results log poisoned")
                    .push((tag, payload));
            }
            ResultSink::Notify(callback) => {
                debug!(%tag, "Dispatching inbound message");
                callback(tag, payload);
            }
        }
    }
}
