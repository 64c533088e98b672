//! WebSocket transport
//!
//! Maintains one WebSocket connection and speaks a small JSON envelope on
//! top of it. Outbound messages carry `tag` and `payload`, plus an `ack`
//! id when the caller wants a receipt. The peer acknowledges by echoing
//! the `ack` id (without a `tag`); inbound messages from the peer carry
//! `tag` and `payload` and are handed to the registered handler.
//!
//! The connect handshake runs in a spawned task; completion is reported
//! through the open listener. A reader task answers Ping with Pong and
//! flips the liveness flag when the stream ends.

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{http::Request, protocol::Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use super::{AckCallback, MessageHandler, OpenListener, Transport};
use crate::types::{Result, TetherError};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// One frame on the wire.
///
/// `tag` and `payload` are a contract with the server and must not be
/// renamed. `ack` carries the acknowledgement id in both directions.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ack: Option<u64>,
}

struct WsInner {
    sink: Mutex<Option<WsSink>>,
    open: AtomicBool,
    next_ack: AtomicU64,
    pending_acks: DashMap<u64, AckCallback>,
    open_listener: std::sync::Mutex<Option<OpenListener>>,
    message_handler: std::sync::Mutex<Option<MessageHandler>>,
}

/// WebSocket implementation of [`Transport`].
///
/// Cheap to clone; clones share the underlying connection.
#[derive(Clone)]
pub struct WsTransport {
    inner: Arc<WsInner>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(WsInner {
                sink: Mutex::new(None),
                open: AtomicBool::new(false),
                next_ack: AtomicU64::new(0),
                pending_acks: DashMap::new(),
                open_listener: std::sync::Mutex::new(None),
                message_handler: std::sync::Mutex::new(None),
            }),
        }
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for WsTransport {
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
        let request = build_handshake(address)?;
        let inner = Arc::clone(&self.inner);
        let address = address.to_string();

        tokio::spawn(async move {
            match connect_async_with_config(request, None, false).await {
                Ok((ws, _)) => {
                    let (sink, stream) = ws.split();
                    *inner.sink.lock().await = Some(sink);
                    inner.open.store(true, Ordering::Release);
                    info!(%address, "WebSocket open");

                    let listener = inner
                        .open_listener
                        .lock()
                        .expect("open listener poisoned")
                        .clone();
                    if let Some(listener) = listener {
                        listener();
                    }

                    read_loop(inner, stream).await;
                }
                Err(e) => {
                    error!(%address, error = %e, "WebSocket connect failed");
                }
            }
        });

        Ok(())
    }

    fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    async fn emit(&self, tag: &str, payload: Value, ack: Option<AckCallback>) -> Result<()> {
        if !self.is_open() {
            return Err(TetherError::NotOpen);
        }

        let ack_id = ack.map(|callback| {
            let id = self.inner.next_ack.fetch_add(1, Ordering::Relaxed);
            self.inner.pending_acks.insert(id, callback);
            id
        });

        let envelope = Envelope {
            tag: Some(tag.to_string()),
            payload: Some(payload),
            ack: ack_id,
        };
        let text =
            serde_json::to_string(&envelope).map_err(|e| TetherError::Envelope(e.to_string()))?;

        let mut sink = self.inner.sink.lock().await;
        let Some(sink) = sink.as_mut() else {
            if let Some(id) = ack_id {
                self.inner.pending_acks.remove(&id);
            }
            return Err(TetherError::NotOpen);
        };

        if let Err(e) = sink.send(Message::Text(text)).await {
            if let Some(id) = ack_id {
                self.inner.pending_acks.remove(&id);
            }
            self.inner.open.store(false, Ordering::Release);
            return Err(TetherError::Send(e.to_string()));
        }

        debug!(%tag, ack = ?ack_id, "Emitted frame");
        Ok(())
    }
}

/// Build the upgrade request with explicit handshake headers.
fn build_handshake(address: &str) -> Result<Request<()>> {
    let host = address.split("//").last().unwrap_or("localhost");

    Request::builder()
        .uri(address)
        .header("Host", host)
        .header("Origin", "http://localhost")
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header(
            "Sec-WebSocket-Key",
            tokio_tungstenite::tungstenite::handshake::client::generate_key(),
        )
        .body(())
        .map_err(|e| TetherError::Handshake(format!("Failed to build request: {e}")))
}

/// Pump inbound frames until the stream ends, then flip liveness off.
async fn read_loop(inner: Arc<WsInner>, mut stream: WsStream) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => dispatch_frame(&inner, &text),
            Ok(Message::Ping(data)) => {
                let mut sink = inner.sink.lock().await;
                if let Some(sink) = sink.as_mut() {
                    let _ = sink.send(Message::Pong(data)).await;
                }
            }
            Ok(Message::Close(frame)) => {
                info!(?frame, "Peer closed connection");
                break;
            }
            Err(e) => {
                error!(error = %e, "WebSocket read error");
                break;
            }
            _ => {}
        }
    }

    inner.open.store(false, Ordering::Release);
    *inner.sink.lock().await = None;
    // Unanswered callbacks are dropped so their waiters resolve now
    // instead of sleeping out the full acknowledgement timeout.
    inner.pending_acks.clear();
}

/// Route one inbound text frame: acknowledgement or tagged message.
fn dispatch_frame(inner: &WsInner, text: &str) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "Dropping undecodable frame");
            return;
        }
    };

    let Envelope { tag, payload, ack } = envelope;
    match (tag, ack) {
        (None, Some(id)) => match inner.pending_acks.remove(&id) {
            Some((_, callback)) => callback(payload.unwrap_or(Value::Null)),
            None => warn!(id, "Acknowledgement with no pending request"),
        },
        (Some(tag), _) => {
            let handler = inner
                .message_handler
                .lock()
                .expect("message handler poisoned")
                .clone();
            match handler {
                Some(handler) => handler(tag, payload.unwrap_or(Value::Null)),
                None => debug!(%tag, "Inbound message before handler registration"),
            }
        }
        (None, None) => warn!("Frame with neither tag nor ack"),
    }
}
