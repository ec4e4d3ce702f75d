//! In-process transport for tests.
//!
//! Captures outbound frames and lets a test play the remote end: inspect
//! what was sent, inject response/event frames, and simulate transport
//! closure or failure.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::identifiers::CommandId;
use crate::transport::{Transport, TransportEvent, TransportRx};

// ============================================================================
// LoopbackTransport
// ============================================================================

/// Test transport: the remote end is the test itself.
pub(crate) struct LoopbackTransport {
    sent_tx: mpsc::UnboundedSender<String>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    fail_sends: AtomicBool,
    closed: AtomicBool,
}

impl LoopbackTransport {
    /// Creates a transport plus the inbound stream for the connection and
    /// an outbound stream for the test to observe sent frames.
    pub(crate) fn channel() -> (Arc<Self>, TransportRx, mpsc::UnboundedReceiver<String>) {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            sent_tx,
            events_tx,
            fail_sends: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        (transport, events_rx, sent_rx)
    }

    /// Makes every subsequent `send` fail.
    pub(crate) fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once the connection released the transport.
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Injects a raw inbound frame.
    pub(crate) fn inject_frame(&self, frame: impl Into<String>) {
        let _ = self.events_tx.send(TransportEvent::Frame(frame.into()));
    }

    /// Injects a success response for `id`.
    pub(crate) fn inject_response(&self, id: CommandId, result: Value) {
        self.inject_frame(json!({ "id": id, "result": result }).to_string());
    }

    /// Injects an error response for `id`.
    pub(crate) fn inject_error_response(&self, id: CommandId, code: i64, message: &str) {
        self.inject_frame(
            json!({ "id": id, "error": { "code": code, "message": message } }).to_string(),
        );
    }

    /// Injects an event, optionally session-scoped.
    pub(crate) fn inject_event(&self, method: &str, session_id: Option<&str>, params: Value) {
        let mut frame = json!({ "method": method, "params": params });
        if let Some(session_id) = session_id {
            frame["sessionId"] = json!(session_id);
        }
        self.inject_frame(frame.to_string());
    }

    /// Simulates a clean remote closure.
    pub(crate) fn inject_closed(&self) {
        let _ = self.events_tx.send(TransportEvent::Closed);
    }

    /// Simulates a transport fault.
    pub(crate) fn inject_transport_error(&self, message: &str) {
        let _ = self.events_tx.send(TransportEvent::Error(message.to_string()));
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, frame: String) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
            return Err(Error::transport("loopback send failure"));
        }
        self.sent_tx
            .send(frame)
            .map_err(|_| Error::transport("loopback receiver dropped"))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Extracts the `id` of a sent command frame.
pub(crate) fn sent_command_id(frame: &str) -> CommandId {
    let value: Value = serde_json::from_str(frame).expect("sent frame is JSON");
    CommandId::new(value["id"].as_u64().expect("sent frame has id"))
}

/// Extracts the `method` of a sent command frame.
pub(crate) fn sent_command_method(frame: &str) -> String {
    let value: Value = serde_json::from_str(frame).expect("sent frame is JSON");
    value["method"].as_str().expect("sent frame has method").to_string()
}
