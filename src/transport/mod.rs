//! Transport layer.
//!
//! The core depends on a transport only through two narrow surfaces: an
//! outbound [`Transport::send`] for text frames, and an inbound stream of
//! [`TransportEvent`]s that drives the connection's receive loop.
//!
//! ```text
//! ┌──────────────┐  send(frame)   ┌──────────────────┐
//! │  Connection  │───────────────►│    Transport     │
//! │ receive loop │◄───────────────│ (WebSocket, ...) │
//! └──────────────┘ TransportEvent └──────────────────┘
//! ```
//!
//! A transport signals its end exactly once: either [`TransportEvent::Closed`]
//! for a clean closure or [`TransportEvent::Error`] for a fault. The
//! connection translates both into a close cascade.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `websocket` | tokio-tungstenite client transport |

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket client transport.
pub mod websocket;

#[cfg(test)]
pub(crate) mod loopback;

// ============================================================================
// Re-exports
// ============================================================================

pub use websocket::WebSocketTransport;

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

// ============================================================================
// TransportEvent
// ============================================================================

/// Inbound notification from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A complete text frame arrived.
    Frame(String),
    /// The channel closed cleanly.
    Closed,
    /// The channel failed.
    Error(String),
}

/// Receiving half of a transport: the stream the receive loop consumes.
pub type TransportRx = mpsc::UnboundedReceiver<TransportEvent>;

// ============================================================================
// Transport
// ============================================================================

/// Outbound half of a bidirectional frame channel.
///
/// Implementations must serialize concurrent `send` calls so frames are
/// never interleaved mid-write.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Writes one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying channel is unavailable.
    async fn send(&self, frame: String) -> Result<()>;

    /// Closes the outbound half. Idempotent.
    async fn close(&self);
}
