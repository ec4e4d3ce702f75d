//! Command, Response, and Event frame types.
//!
//! Defines the JSON-RPC-style wire format spoken over the transport.
//!
//! # Format
//!
//! Command (local end to remote end):
//!
//! ```json
//! { "id": 7, "method": "Network.enable", "sessionId": "sess-1", "params": {} }
//! ```
//!
//! Response (remote end to local end, correlated by `id`):
//!
//! ```json
//! { "id": 7, "result": { ... }, "sessionId": "sess-1" }
//! { "id": 7, "error": { "code": -32601, "message": "..." } }
//! ```
//!
//! Event (remote end to local end, no `id`):
//!
//! ```json
//! { "method": "Network.requestWillBeSent", "params": { ... }, "sessionId": "sess-1" }
//! ```
//!
//! Frames with an `id` are responses; frames without are events. [`Message`]
//! encodes that discrimination with an untagged enum.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::{CommandId, SessionId};

// ============================================================================
// Command
// ============================================================================

/// A command frame from local end to remote end.
#[derive(Debug, Clone, Serialize)]
pub struct Command {
    /// Correlation identifier, allocated by the connection.
    pub id: CommandId,

    /// Method name in `Module.methodName` format.
    pub method: String,

    /// Session the command is scoped to; absent for root-level commands.
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,

    /// Method parameters.
    pub params: Value,
}

impl Command {
    /// Creates a command frame.
    #[inline]
    #[must_use]
    pub fn new(
        id: CommandId,
        method: impl Into<String>,
        session_id: Option<SessionId>,
        params: Value,
    ) -> Self {
        Self {
            id,
            method: method.into(),
            session_id,
            params,
        }
    }
}

// ============================================================================
// Response
// ============================================================================

/// A response frame from remote end to local end.
///
/// Exactly one of `result` / `error` is populated.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    /// Matches the command `id`.
    pub id: CommandId,

    /// Session the response belongs to, when session-scoped.
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<SessionId>,

    /// Result data (if success).
    #[serde(default)]
    pub result: Option<Value>,

    /// Error payload (if the remote end rejected the command).
    #[serde(default)]
    pub error: Option<ErrorPayload>,
}

impl Response {
    /// Returns `true` if the remote end rejected the command.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// ============================================================================
// ErrorPayload
// ============================================================================

/// Remote error payload carried in an error response.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorPayload {
    /// Remote error code.
    pub code: i64,

    /// Remote error message.
    pub message: String,

    /// Additional error detail, when provided.
    #[serde(default)]
    pub data: Option<String>,
}

// ============================================================================
// Event
// ============================================================================

/// An event frame from remote end to local end.
///
/// Events carry no correlation id; they are dispatched by session id to
/// registered predicate waiters and event listeners.
#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    /// Event name in `Module.eventName` format.
    pub method: String,

    /// Session the event belongs to; absent for connection-level events.
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<SessionId>,

    /// Event-specific data.
    #[serde(default)]
    pub params: Value,
}

impl Event {
    /// Returns the module name from the method.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let event = Event { method: "Network.requestWillBeSent".into(), .. };
    /// assert_eq!(event.module(), "Network");
    /// ```
    #[inline]
    #[must_use]
    pub fn module(&self) -> &str {
        self.method.split('.').next().unwrap_or_default()
    }

    /// Returns the event name from the method.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        self.method.split('.').nth(1).unwrap_or_default()
    }

    /// Gets a string from params.
    #[inline]
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Gets a nested string from params (`params[outer][key]`).
    #[inline]
    #[must_use]
    pub fn get_nested_str(&self, outer: &str, key: &str) -> Option<&str> {
        self.params
            .get(outer)
            .and_then(|v| v.get(key))
            .and_then(Value::as_str)
    }
}

// ============================================================================
// Message
// ============================================================================

/// Discriminated union of inbound frames.
///
/// Uses serde's `untagged` to distinguish based on presence of the `id`
/// field: frames with `id` are responses, frames without are events.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Message {
    /// Response frame (has `id`).
    Response(Response),
    /// Event frame (no `id`).
    Event(Event),
}

// ============================================================================
// Tests
// ============================================================================
