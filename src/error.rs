//! Error types for the multiplexing core.
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`].
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Closed target | [`Error::TargetClosed`] |
//! | Remote protocol | [`Error::Protocol`] |
//! | Deadlines | [`Error::Timeout`] |
//! | Transport | [`Error::Transport`], [`Error::Endpoint`] |
//! | External | [`Error::Json`], [`Error::WebSocket`], [`Error::ChannelClosed`] |
//!
//! The three caller-visible kinds are deliberately disjoint: a closed-target
//! rejection always renders as `Target closed: ...` and carries the
//! [`CloseReason`]; a deadline always renders as `Timeout after ...`; a
//! remote error payload surfaces only to the command it correlates with.
//! Transport faults in flight are converted into a close cascade before any
//! waiter observes them, so callers see [`Error::TargetClosed`] rather than
//! a raw I/O failure.

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::close::CloseReason;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Closed Target
    // ========================================================================
    /// A command or wait was rejected because its session/connection closed.
    ///
    /// Carries the [`CloseReason`] so callers can distinguish an intentional
    /// close from a transport fault.
    #[error("Target closed: {cause}")]
    TargetClosed {
        /// Why the target closed.
        reason: CloseReason,
        /// Human-readable cause.
        cause: String,
    },

    // ========================================================================
    // Remote Protocol
    // ========================================================================
    /// The remote end returned an error payload for a specific command.
    #[error("Protocol error [{code}]: {message}")]
    Protocol {
        /// Remote error code.
        code: i64,
        /// Remote error message.
        message: String,
    },

    // ========================================================================
    // Deadlines
    // ========================================================================
    /// An event wait's deadline elapsed with no match and no close.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before the deadline.
        timeout_ms: u64,
    },

    // ========================================================================
    // Transport
    // ========================================================================
    /// The transport could not carry a frame.
    ///
    /// Internal: in-flight write failures trigger a close cascade and
    /// surface to callers as [`Error::TargetClosed`]. This variant reaches
    /// callers only from connect-time failures.
    #[error("Transport failure: {message}")]
    Transport {
        /// Description of the transport fault.
        message: String,
    },

    /// The endpoint URL was not a valid WebSocket endpoint.
    #[error("Invalid endpoint: {message}")]
    Endpoint {
        /// Description of the problem.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// A completion channel closed without delivering a resolution.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a closed-target error for `what` (e.g. `"session"`,
    /// `"connection"`), tagged with `reason`.
    #[inline]
    pub fn target_closed(reason: CloseReason, what: &str) -> Self {
        Self::TargetClosed {
            reason,
            cause: format!("{what} {reason}", reason = reason.as_str()),
        }
    }

    /// Creates a protocol error from a remote error payload.
    #[inline]
    pub fn protocol(code: i64, message: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a transport failure error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an invalid endpoint error.
    #[inline]
    pub fn endpoint(message: impl Into<String>) -> Self {
        Self::Endpoint {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a closed-target rejection.
    #[inline]
    #[must_use]
    pub fn is_target_closed(&self) -> bool {
        matches!(self, Self::TargetClosed { .. })
    }

    /// Returns `true` if this is a deadline expiry.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if the remote end reported a protocol error.
    #[inline]
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }

    /// Returns the close reason for a closed-target rejection.
    #[inline]
    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        match self {
            Self::TargetClosed { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_closed_display() {
        let err = Error::target_closed(CloseReason::ExplicitClose, "session");
        let rendered = err.to_string();

        assert!(rendered.starts_with("Target closed:"));
        assert!(rendered.contains("closed by client"));
        assert!(!rendered.contains("Timeout"));
    }

    #[test]
    fn test_timeout_display_disjoint_from_close() {
        let err = Error::timeout("wait for event \"Network.responseReceived\"", 5000);
        let rendered = err.to_string();

        assert!(rendered.contains("Timeout after 5000ms"));
        assert!(!rendered.contains("Target closed"));
    }

    #[test]
    fn test_protocol_display() {
        let err = Error::protocol(-32601, "'Fake.method' wasn't found");
        assert_eq!(
            err.to_string(),
            "Protocol error [-32601]: 'Fake.method' wasn't found"
        );
        assert!(err.is_protocol());
    }

    #[test]
    fn test_close_reason_accessor() {
        let err = Error::target_closed(CloseReason::TransportError, "connection");
        assert_eq!(err.close_reason(), Some(CloseReason::TransportError));
        assert!(err.is_target_closed());

        let other = Error::timeout("x", 1);
        assert_eq!(other.close_reason(), None);
        assert!(other.is_timeout());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_reason_per_variant_is_distinguishable() {
        for reason in [
            CloseReason::ExplicitClose,
            CloseReason::TargetDetached,
            CloseReason::TransportClosed,
            CloseReason::TransportError,
        ] {
            let err = Error::target_closed(reason, "session");
            assert_eq!(err.close_reason(), Some(reason));
            assert!(err.to_string().contains(reason.as_str()));
        }
    }
}
