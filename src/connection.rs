//! Connection lifecycle manager
//!
//! ## Overview
//!
//! One `Connection` owns one transport and provides:
//! 1. Connection establishment with a bounded wait
//! 2. An ordered request queue that survives disconnects
//! 3. A background drain loop sending one request at a time, in order
//! 4. Per-request acknowledgement waits with timeout
//!
//! ## Protocol
//!
//! A connect attempt races the transport open event against a timer; a
//! single-resolution channel decides the winner, so a late open event after
//! the timer fired is a no-op. Once connected, inbound messages are routed
//! to the caller's sink and the drain loop starts sending queued requests.
//! A request whose acknowledgement times out stays at the head of the
//! queue and is retried; a dead transport suspends draining until the
//! caller reconnects, with the queue intact.

use serde_json::Value;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::TetherConfig;
use crate::request::RequestQueue;
use crate::sink::{MessageCallback, ResultSink, SharedResults};
use crate::transport::{AckCallback, Transport};
use crate::types::Status;

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

/// Lock-free cell for the lifecycle state.
struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(ConnectionState::Disconnected as u8))
    }

    fn get(&self) -> ConnectionState {
        match self.0.load(Ordering::Acquire) {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }

    fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

struct Inner<T: Transport> {
    transport: T,
    config: TetherConfig,
    state: StateCell,
    queue: RequestQueue,
}

/// Reliability manager for one transport.
///
/// Cheap to clone; clones share the state machine, the queue, and the
/// drain loop.
pub struct Connection<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for Connection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> Connection<T> {
    /// Create a manager with default tunables and start its drain loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, TetherConfig::default())
    }

    /// Create a manager with explicit tunables and start its drain loop.
    pub fn with_config(transport: T, config: TetherConfig) -> Self {
        let inner = Arc::new(Inner {
            transport,
            config,
            state: StateCell::new(),
            queue: RequestQueue::new(),
        });

        let drain = Arc::clone(&inner);
        tokio::spawn(async move {
            drain_loop(drain).await;
        });

        Self { inner }
    }

    /// Connect and collect every inbound `(tag, payload)` pair into the
    /// caller's shared results log.
    pub async fn connect_collect(&self, address: &str, results: SharedResults) -> Status {
        self.connect_inner(address, ResultSink::Collect(results))
            .await
    }

    /// Connect and invoke `callback` once per inbound message.
    pub async fn connect_notify<F>(&self, address: &str, callback: F) -> Status
    where
        F: Fn(String, Value) + Send + Sync + 'static,
    {
        let callback: MessageCallback = Arc::new(callback);
        self.connect_inner(address, ResultSink::Notify(callback))
            .await
    }

    /// Queue a request for delivery.
    ///
    /// The request is always queued. `NotConnected` is advisory: it tells
    /// the caller the send is deferred until a connection exists. Requests
    /// with `wait_for_ack` false replace an already queued entry with the
    /// same tag in place.
    pub fn add_request(&self, tag: &str, payload: Value, wait_for_ack: bool) -> Status {
        self.inner.queue.add(tag, payload, wait_for_ack);

        if self.inner.state.get() != ConnectionState::Connected {
            return Status::NotConnected;
        }
        Status::Success
    }

    /// Number of requests waiting to be sent.
    pub fn pending_requests(&self) -> usize {
        self.inner.queue.len()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    async fn connect_inner(&self, address: &str, sink: ResultSink) -> Status {
        let inner = &self.inner;

        if inner.state.get() == ConnectionState::Connected {
            warn!(%address, "Connect attempt while already connected");
            return Status::AlreadyConnected;
        }
        inner.state.set(ConnectionState::Connecting);

        // Single-resolution race: whichever of the open event and the
        // timer resolves first wins, the loser is a no-op.
        let (open_tx, open_rx) = oneshot::channel::<()>();
        let open_tx = std::sync::Mutex::new(Some(open_tx));
        inner.transport.set_open_listener(Arc::new(move || {
            if let Some(tx) = open_tx.lock().expect("open listener poisoned").take() {
                let _ = tx.send(());
            }
        }));

        if let Err(e) = inner.transport.connect(address).await {
            error!(%address, error = %e, "Connect could not start");
            inner.state.set(ConnectionState::Disconnected);
            return Status::NotConnected;
        }

        match timeout(inner.config.handshake_timeout, open_rx).await {
            Ok(Ok(())) => {
                inner.state.set(ConnectionState::Connected);
                inner
                    .transport
                    .on_message(Arc::new(move |tag, payload| sink.deliver(tag, payload)));
                info!(%address, "Connected");
                Status::Success
            }
            Ok(Err(_)) => {
                // Listener dropped without firing.
                error!(%address, "Open event lost");
                inner.state.set(ConnectionState::Disconnected);
                Status::NotConnected
            }
            Err(_) => {
                warn!(
                    %address,
                    timeout_ms = inner.config.handshake_timeout.as_millis() as u64,
                    "Handshake timed out"
                );
                inner.state.set(ConnectionState::Disconnected);
                Status::TimedOut
            }
        }
    }
}

/// Perpetual background loop sending queued requests while connected.
///
/// One request in flight at a time, strict queue order, at-least-once
/// attempts. A timed out head stays queued; a dead transport suspends
/// draining with the queue intact.
async fn drain_loop<T: Transport>(inner: Arc<Inner<T>>) {
    debug!("Drain loop started");
    loop {
        sleep(inner.config.idle_poll).await;

        while !inner.queue.is_empty() && inner.state.get() == ConnectionState::Connected {
            if !inner.transport.is_open() {
                warn!(
                    pending = inner.queue.len(),
                    "Transport closed, suspending drain until reconnect"
                );
                inner.state.set(ConnectionState::Disconnected);
                break;
            }

            match send_head(&inner).await {
                Status::Success => inner.queue.pop_head(),
                Status::TimedOut => {
                    if let Some(backoff) = inner.config.retry_backoff {
                        sleep(backoff).await;
                    }
                    break;
                }
                _ => break,
            }
        }
    }
}

/// Send the head request, waiting for the peer acknowledgement when the
/// request asks for one.
async fn send_head<T: Transport>(inner: &Inner<T>) -> Status {
    if inner.state.get() != ConnectionState::Connected {
        return Status::NotConnected;
    }
    let Some(request) = inner.queue.head() else {
        return Status::Success;
    };

    if !request.wait_for_ack {
        return match inner.transport.emit(&request.tag, request.payload, None).await {
            Ok(()) => {
                debug!(tag = %request.tag, id = request.id, "Sent fire-and-forget request");
                Status::Success
            }
            Err(e) => {
                warn!(tag = %request.tag, error = %e, "Emit failed, request stays queued");
                Status::NotConnected
            }
        };
    }

    let (ack_tx, ack_rx) = oneshot::channel::<()>();
    let ack: AckCallback = Box::new(move |_response| {
        let _ = ack_tx.send(());
    });

    if let Err(e) = inner
        .transport
        .emit(&request.tag, request.payload, Some(ack))
        .await
    {
        warn!(tag = %request.tag, error = %e, "Emit failed, request stays queued");
        return Status::NotConnected;
    }

    match timeout(inner.config.ack_timeout, ack_rx).await {
        Ok(Ok(())) => {
            debug!(tag = %request.tag, id = request.id, "Request acknowledged");
            Status::Success
        }
        Ok(Err(_)) => {
            // The transport discarded the callback, usually a teardown
            // between emit and ack. The head stays queued for retry.
            warn!(tag = %request.tag, "Acknowledgement dropped, treating as timeout");
            Status::TimedOut
        }
        Err(_) => {
            warn!(
                tag = %request.tag,
                timeout_ms = inner.config.ack_timeout.as_millis() as u64,
                "Acknowledgement timed out"
            );
            Status::TimedOut
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::shared_results;
    use crate::transport::MockTransport;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn fast_config() -> TetherConfig {
        TetherConfig {
            handshake_timeout: Duration::from_millis(50),
            ack_timeout: Duration::from_millis(100),
            idle_poll: Duration::from_millis(20),
            retry_backoff: None,
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            sleep(Duration::from_millis(25)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_connect_collect_receives_messages() {
        let mock = MockTransport::accepting();
        let connection = Connection::new(mock.clone());
        let results = shared_results();

        let status = connection
            .connect_collect("mock://peer", Arc::clone(&results))
            .await;
        assert_eq!(status, Status::Success);
        assert!(connection.is_connected());

        mock.inject("evt", json!({"n": 1}));
        mock.inject("evt", json!({"n": 2}));

        let log = results.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0], ("evt".to_string(), json!({"n": 1})));
    }

    #[tokio::test]
    async fn test_connect_notify_invokes_callback() {
        let mock = MockTransport::accepting();
        let connection = Connection::new(mock.clone());
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);

        let status = connection
            .connect_notify("mock://peer", move |tag, _payload| {
                assert_eq!(tag, "evt");
                counter.fetch_add(1, Ordering::Relaxed);
            })
            .await;
        assert_eq!(status, Status::Success);

        mock.inject("evt", json!(null));
        assert_eq!(seen.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_connect_while_connected_is_rejected() {
        let mock = MockTransport::accepting();
        let connection = Connection::new(mock.clone());

        let first = connection
            .connect_collect("mock://peer", shared_results())
            .await;
        assert_eq!(first, Status::Success);

        connection.add_request("keep", json!(1), true);
        let second = connection
            .connect_collect("mock://peer", shared_results())
            .await;
        assert_eq!(second, Status::AlreadyConnected);
        assert!(connection.is_connected());
        assert_eq!(connection.pending_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_times_out_against_silent_peer() {
        let mock = MockTransport::unreachable();
        let connection = Connection::with_config(mock, fast_config());

        let status = connection
            .connect_collect("mock://void", shared_results())
            .await;
        assert_eq!(status, Status::TimedOut);
        assert!(!connection.is_connected());
    }

    #[tokio::test]
    async fn test_add_request_while_disconnected_is_advisory() {
        let mock = MockTransport::unreachable();
        let connection = Connection::new(mock);

        let status = connection.add_request("status", json!("v1"), false);
        assert_eq!(status, Status::NotConnected);
        assert_eq!(connection.pending_requests(), 1);
    }

    #[tokio::test]
    async fn test_pending_count_tracks_queue_while_disconnected() {
        let mock = MockTransport::unreachable();
        let connection = Connection::new(mock.clone());

        connection.add_request("a", json!(1), true);
        connection.add_request("b", json!(2), true);
        connection.add_request("c", json!(3), true);
        assert_eq!(connection.pending_requests(), 3);
        assert_eq!(mock.sent_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_sends_fire_and_forget() {
        let mock = MockTransport::accepting();
        let connection = Connection::with_config(mock.clone(), fast_config());

        connection
            .connect_collect("mock://peer", shared_results())
            .await;
        let status = connection.add_request("status", json!("v1"), false);
        assert_eq!(status, Status::Success);

        let probe = connection.clone();
        wait_until(move || probe.pending_requests() == 0).await;

        let sent = mock.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].tag, "status");
        assert!(!sent[0].wanted_ack);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledged_request_is_removed() {
        let mock = MockTransport::accepting();
        let connection = Connection::with_config(mock.clone(), fast_config());

        connection
            .connect_collect("mock://peer", shared_results())
            .await;
        connection.add_request("cmd", json!({"op": "run"}), true);

        let probe = connection.clone();
        wait_until(move || probe.pending_requests() == 0).await;
        assert_eq!(mock.sent_count(), 1);
        assert!(mock.sent()[0].wanted_ack);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_request_stays_queued() {
        let mock = MockTransport::holding_acks();
        let connection = Connection::with_config(mock.clone(), fast_config());

        connection
            .connect_collect("mock://peer", shared_results())
            .await;
        connection.add_request("cmd", json!({}), true);

        // At least two attempts, the head never leaves the queue.
        let probe = mock.clone();
        wait_until(move || probe.sent_count() >= 2).await;
        assert_eq!(connection.pending_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_tag_acked_requests_both_send() {
        let mock = MockTransport::accepting();
        let connection = Connection::with_config(mock.clone(), fast_config());

        connection
            .connect_collect("mock://peer", shared_results())
            .await;
        connection.add_request("cmd", json!(1), true);
        connection.add_request("cmd", json!(2), true);
        assert_eq!(connection.pending_requests(), 2);

        let probe = connection.clone();
        wait_until(move || probe.pending_requests() == 0).await;

        let sent = mock.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].payload, json!(1));
        assert_eq!(sent[1].payload, json!(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_transport_suspends_drain_and_keeps_queue() {
        let mock = MockTransport::accepting();
        let connection = Connection::with_config(mock.clone(), fast_config());

        connection
            .connect_collect("mock://peer", shared_results())
            .await;
        mock.close();
        connection.add_request("cmd", json!({}), true);

        let probe = connection.clone();
        wait_until(move || !probe.is_connected()).await;
        assert_eq!(connection.pending_requests(), 1);
        assert_eq!(mock.sent_count(), 0);
    }
}
