//! Type-safe identifiers for protocol entities.
//!
//! Newtype wrappers prevent mixing incompatible identifiers at compile time:
//! a [`CommandId`] can never be used where a [`SessionId`] is expected.
//!
//! | Type | Backing | Origin |
//! |------|---------|--------|
//! | [`CommandId`] | `u64` | Allocated locally, monotonic per connection |
//! | [`SessionId`] | string | Issued by the remote end on target attach |
//! | [`TargetId`] | string | Issued by the remote end |
//! | [`BrowserContextId`] | string | Issued by the remote end |
//! | [`WaiterId`] | UUID | Allocated locally per predicate waiter |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// CommandId
// ============================================================================

/// Correlation identifier for a command/response pair.
///
/// Allocated by the connection from a monotonically increasing counter.
/// Unique for the lifetime of the connection; never reused while a waiter
/// for it is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(u64);

impl CommandId {
    /// Creates a command id from a raw counter value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw counter value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// SessionId
// ============================================================================

/// Identifier of a per-target session over the shared connection.
///
/// Issued by the remote end in the attach notification. Cheap to clone;
/// used as routing key in the connection's session table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Arc<str>);

impl SessionId {
    /// Creates a session id from a wire string.
    #[inline]
    #[must_use]
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(Arc::from(value.as_ref()))
    }

    /// Returns the wire representation.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// TargetId
// ============================================================================

/// Identifier of a remote target (page, worker, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(Arc<str>);

impl TargetId {
    /// Creates a target id from a wire string.
    #[inline]
    #[must_use]
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(Arc::from(value.as_ref()))
    }

    /// Returns the wire representation.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// BrowserContextId
// ============================================================================

/// Identifier of a browser context (isolated cookie/storage universe).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BrowserContextId(Arc<str>);

impl BrowserContextId {
    /// Creates a context id from a wire string.
    #[inline]
    #[must_use]
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(Arc::from(value.as_ref()))
    }

    /// Returns the wire representation.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BrowserContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BrowserContextId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// WaiterId
// ============================================================================

/// Identity of a registered predicate waiter.
///
/// Random so that registrations from different calling contexts can never
/// collide; used for the remove-on-timeout race (see the waiter registry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaiterId(Uuid);

impl WaiterId {
    /// Allocates a fresh waiter id.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for WaiterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_id_roundtrip() {
        let id = CommandId::new(42);
        assert_eq!(id.value(), 42);
        assert_eq!(id.to_string(), "42");

        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "42");
        let back: CommandId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, id);
    }

    #[test]
    fn test_session_id_transparent_serde() {
        let id = SessionId::new("sess-1");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"sess-1\"");
        assert_eq!(id.as_str(), "sess-1");
    }

    #[test]
    fn test_session_id_equality() {
        assert_eq!(SessionId::new("a"), SessionId::from("a"));
        assert_ne!(SessionId::new("a"), SessionId::new("b"));
    }

    #[test]
    fn test_waiter_ids_unique() {
        let a = WaiterId::generate();
        let b = WaiterId::generate();
        assert_ne!(a, b);
    }
}
