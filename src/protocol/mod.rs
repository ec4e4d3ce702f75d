//! Wire protocol message types.
//!
//! This module defines the JSON-RPC-style message format spoken between the
//! local end (this crate) and the remote debugging endpoint.
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | [`Command`] | Local → Remote | Command request, correlated by id |
//! | [`Response`] | Remote → Local | Command completion (result or error) |
//! | [`Event`] | Remote → Local | Notification, routed by session id |
//!
//! Method names follow `Module.methodName` format (`Target.attachToTarget`,
//! `Network.enable`, ...). The core routes by id and session id only; it
//! never interprets method semantics beyond the two target-lifecycle
//! notifications used to maintain the session table.

// ============================================================================
// Submodules
// ============================================================================

/// Command, Response, and Event frame types.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use message::{Command, ErrorPayload, Event, Message, Response};

// ============================================================================
// Target lifecycle methods
// ============================================================================

/// Notification that a target was attached and a session created for it.
pub const TARGET_ATTACHED: &str = "Target.attachedToTarget";

/// Notification that a session's target detached.
pub const TARGET_DETACHED: &str = "Target.detachedFromTarget";
