//! Outgoing request queue
//!
//! Ordered, tag-addressable queue of pending requests. Insertion order is
//! send order. Requests that do not wait for an acknowledgement are
//! deduplicated by tag: re-adding one replaces the first queued entry with
//! that tag in place, keeping its queue position. Requests that wait for an
//! acknowledgement always append, so several may share a tag.

use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// A single queued request.
#[derive(Debug, Clone)]
pub struct Request {
    /// Queue-local identifier, wraps to 0 on overflow.
    pub id: u64,
    /// Routing tag, also the dedup key for fire-and-forget requests.
    pub tag: String,
    /// Opaque payload forwarded verbatim to the peer.
    pub payload: Value,
    /// Whether the drain loop must wait for a peer acknowledgement before
    /// removing this request.
    pub wait_for_ack: bool,
}

/// Thread-safe FIFO of pending requests.
///
/// The lock is held only for queue mutation and inspection, never across a
/// send.
pub struct RequestQueue {
    entries: Mutex<Vec<Request>>,
    next_id: AtomicU64,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Queue a request.
    ///
    /// Fire-and-forget requests replace the first queued entry with the
    /// same tag, keeping its position; everything else appends.
    pub fn add(&self, tag: &str, payload: Value, wait_for_ack: bool) {
        let request = Request {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            tag: tag.to_string(),
            payload,
            wait_for_ack,
        };

        let mut entries = self.entries.lock().expect("request queue poisoned");
        if !wait_for_ack {
            if let Some(pos) = find(&entries, tag) {
                debug!(tag, pos, "Replacing queued request in place");
                entries[pos] = request;
                return;
            }
        }
        entries.push(request);
        debug!(tag, len = entries.len(), "Queued request");
    }

    /// Number of requests waiting to be sent.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("request queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clone of the head request, if any.
    pub fn head(&self) -> Option<Request> {
        self.entries
            .lock()
            .expect("request queue poisoned")
            .first()
            .cloned()
    }

    /// Drop the head request after a successful send.
    pub fn pop_head(&self) {
        let mut entries = self.entries.lock().expect("request queue poisoned");
        if !entries.is_empty() {
            entries.remove(0);
        }
    }

    #[cfg(test)]
    fn snapshot(&self) -> Vec<Request> {
        self.entries.lock().expect("request queue poisoned").clone()
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Position of the first entry with the given tag.
fn find(entries: &[Request], tag: &str) -> Option<usize> {
    entries.iter().position(|r| r.tag == tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fifo_order() {
        let queue = RequestQueue::new();
        queue.add("a", json!(1), true);
        queue.add("b", json!(2), true);
        queue.add("c", json!(3), true);

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.head().unwrap().tag, "a");
        queue.pop_head();
        assert_eq!(queue.head().unwrap().tag, "b");
    }

    #[test]
    fn test_fire_and_forget_dedupes_in_place() {
        let queue = RequestQueue::new();
        queue.add("status", json!("v1"), false);
        queue.add("cmd1", json!({}), true);
        queue.add("status", json!("v2"), false);

        let entries = queue.snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].tag, "status");
        assert_eq!(entries[0].payload, json!("v2"));
        assert_eq!(entries[1].tag, "cmd1");
    }

    #[test]
    fn test_acked_requests_never_dedupe() {
        let queue = RequestQueue::new();
        queue.add("cmd", json!(1), true);
        queue.add("cmd", json!(2), true);

        let entries = queue.snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].payload, json!(1));
        assert_eq!(entries[1].payload, json!(2));
    }

    #[test]
    fn test_replacement_assigns_fresh_id() {
        let queue = RequestQueue::new();
        queue.add("status", json!("v1"), false);
        let first = queue.head().unwrap().id;
        queue.add("status", json!("v2"), false);
        let second = queue.head().unwrap().id;

        assert_ne!(first, second);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_ids_are_monotonic() {
        let queue = RequestQueue::new();
        for i in 0..5 {
            queue.add(&format!("t{i}"), json!(i), true);
        }
        let entries = queue.snapshot();
        for pair in entries.windows(2) {
            assert!(pair[1].id > pair[0].id);
        }
    }
}
