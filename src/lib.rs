//! cdp-mux - Session-multiplexed DevTools-protocol client core.
//!
//! This library implements the connection/session multiplexing layer of a
//! JSON-RPC-style remote debugging client: one control connection carrying
//! many per-target sessions, with deterministic teardown.
//!
//! # Architecture
//!
//! - One [`Connection`] owns the transport and runs a single, strictly
//!   sequential receive loop; frames are dispatched in transport order.
//! - Outgoing commands get monotonically increasing correlation ids and a
//!   single-resolution waiter; responses resolve waiters by id.
//! - [`Session`]s are logical sub-channels routed by session id, created
//!   and destroyed by target attach/detach notifications.
//! - Every waiter (in-flight command or `wait_for_event` predicate) is
//!   resolved exactly once: by its response/match, by its deadline, or by a
//!   close cascade rejecting it with a [`CloseReason`]-tagged error.
//! - Closing any level of the [`Browser`] → [`BrowserContext`] → [`Page`] →
//!   [`Session`] → [`Connection`] hierarchy collapses into one effective
//!   close per node; `dispose()` blocks until the cascade is observably
//!   complete without ever stalling the receive loop.
//!
//! # Quick Start
//!
//! ```no_run
//! use cdp_mux::{Browser, Connection, Result};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let connection = Connection::connect("ws://127.0.0.1:9222/devtools/browser/abc").await?;
//!     let browser = Browser::attach(connection.clone());
//!
//!     // Ask the endpoint to start attaching targets, then work with them.
//!     connection
//!         .send(
//!             "Target.setAutoAttach",
//!             serde_json::json!({ "autoAttach": true, "waitForDebuggerOnStart": false }),
//!         )
//!         .await?;
//!
//!     for page in browser.pages() {
//!         let load = page
//!             .wait_for_event(|e| e.method == "Page.loadEventFired", Duration::from_secs(30))
//!             .await?;
//!         println!("loaded: {load:?}");
//!     }
//!
//!     browser.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`browser`] | Hierarchy entities: [`Browser`], [`BrowserContext`], [`Page`] |
//! | [`connection`] | Control connection and receive loop |
//! | [`session`] | Per-target sessions |
//! | [`close`] | Close reasons and single-fire latches |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire message types |
//! | [`transport`] | Transport trait and WebSocket implementation |

// ============================================================================
// Modules
// ============================================================================

/// Blocking bridge for synchronous disposal.
mod blocking;

/// Hierarchy entities: Browser, BrowserContext, Page.
pub mod browser;

/// Close reasons and single-fire close latches.
pub mod close;

/// Control connection and receive loop.
pub mod connection;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Ordered publish/subscribe bus for protocol events.
mod events;

/// Type-safe identifiers for protocol entities.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Wire protocol message types.
pub mod protocol;

/// Per-target sessions.
pub mod session;

/// Transport layer.
pub mod transport;

/// Waiter registries (internal).
mod waiter;

// ============================================================================
// Re-exports
// ============================================================================

// Hierarchy types
pub use browser::{Browser, BrowserContext, Page};

// Core types
pub use close::CloseReason;
pub use connection::Connection;
pub use session::Session;

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{BrowserContextId, CommandId, SessionId, TargetId, WaiterId};

// Protocol types
pub use protocol::{Command, ErrorPayload, Event, Message, Response};

// Transport types
pub use transport::{Transport, TransportEvent, TransportRx, WebSocketTransport};
