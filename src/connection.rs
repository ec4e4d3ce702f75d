//! Control connection and receive loop.
//!
//! One [`Connection`] owns the transport to the remote debugging endpoint
//! and multiplexes every per-target [`Session`] over it. It is the single
//! allocator of command correlation ids and the single dispatcher of
//! inbound frames.
//!
//! # Receive Loop
//!
//! The connection spawns one task that consumes the transport's inbound
//! stream. Processing is strictly sequential: one frame is fully dispatched
//! before the next is read, so listeners observe events and responses in
//! exactly the order the transport delivered them.
//!
//! - Frames carrying a correlation `id` resolve the matching command waiter
//!   (success or remote error payload).
//! - `Target.attachedToTarget` / `Target.detachedFromTarget` maintain the
//!   session routing table.
//! - Other frames carrying a `sessionId` route to that session's dispatch
//!   path; frames for unknown or closed sessions are logged and discarded.
//! - Sessionless frames publish on the connection's event bus.
//!
//! # Close
//!
//! [`Connection::close`] is idempotent. The closed state transitions
//! synchronously before any drain step, so a send racing a close always
//! observes "closed". The sweep then rejects every in-flight command with a
//! closed-target error tagged with the [`CloseReason`], closes every owned
//! session with the same reason, and finally releases the transport. A
//! transport-initiated closure (clean close or error) runs the identical
//! cascade, so the caller-visible contract does not depend on the trigger.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use crate::blocking;
use crate::close::{CloseReason, CloseSignal};
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::identifiers::{CommandId, SessionId, TargetId};
use crate::protocol::{Command, Event, Message, Response, TARGET_ATTACHED, TARGET_DETACHED};
use crate::session::Session;
use crate::transport::{Transport, TransportEvent, TransportRx, WebSocketTransport};
use crate::waiter::CommandWaiters;

// ============================================================================
// Connection
// ============================================================================

/// Control connection to the remote debugging endpoint.
///
/// Cheap to clone; all clones share the same underlying connection.
///
/// # Example
///
/// ```no_run
/// use cdp_mux::{Connection, Result};
///
/// # async fn example() -> Result<()> {
/// let connection = Connection::connect("ws://127.0.0.1:9222/devtools/browser/abc").await?;
/// let version = connection.send("Browser.getVersion", serde_json::json!({})).await?;
/// println!("{version}");
/// connection.close(cdp_mux::CloseReason::ExplicitClose).await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

/// Shared state between the handle, the receive loop, and sessions.
pub(crate) struct ConnectionInner {
    /// Endpoint label for diagnostics.
    endpoint: String,
    /// Monotonic command-id counter; ids are never reused.
    next_id: AtomicU64,
    /// In-flight commands keyed by correlation id.
    commands: CommandWaiters,
    /// Routing table: session id to owning session.
    sessions: Mutex<FxHashMap<SessionId, Session>>,
    /// Bus for sessionless (connection-level) events.
    events: EventBus,
    /// Single-fire closed latch.
    closed: CloseSignal,
    /// Outbound half of the transport.
    transport: Arc<dyn Transport>,
    /// Runtime driving the receive loop; used by the sync disposal bridge.
    runtime: Handle,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.inner.endpoint)
            .field("closed", &self.inner.closed.get())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Connection - Constructors
// ============================================================================

impl Connection {
    /// Connects to a WebSocket debugging endpoint.
    ///
    /// # Errors
    ///
    /// - [`Error::Endpoint`] if the URL is not a WebSocket endpoint
    /// - [`Error::WebSocket`] if the handshake fails
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let (transport, events) = WebSocketTransport::connect(endpoint).await?;
        Ok(Self::new(endpoint, transport, events))
    }

    /// Creates a connection over an already-established transport.
    ///
    /// Spawns the receive loop on the current runtime. `events` is the
    /// transport's inbound stream; the loop runs until it yields a terminal
    /// event or the transport handle is dropped.
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        transport: Arc<dyn Transport>,
        events: TransportRx,
    ) -> Self {
        let inner = Arc::new(ConnectionInner {
            endpoint: endpoint.into(),
            next_id: AtomicU64::new(1),
            commands: CommandWaiters::new(),
            sessions: Mutex::new(FxHashMap::default()),
            events: EventBus::new(),
            closed: CloseSignal::new(),
            transport,
            runtime: Handle::current(),
        });

        tokio::spawn(ConnectionInner::run_receive_loop(Arc::clone(&inner), events));

        Self { inner }
    }
}

// ============================================================================
// Connection - Commands
// ============================================================================

impl Connection {
    /// Sends a root-level command and awaits its response.
    ///
    /// # Errors
    ///
    /// - [`Error::TargetClosed`] if the connection is closed (no write is
    ///   attempted) or closes while the command is in flight
    /// - [`Error::Protocol`] if the remote end rejects the command
    pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
        self.inner.execute(None, method, params).await
    }
}

// ============================================================================
// Connection - Accessors
// ============================================================================

impl Connection {
    /// Returns the endpoint label this connection was created with.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Returns the session registered under `session_id`, if any.
    #[must_use]
    pub fn session(&self, session_id: &SessionId) -> Option<Session> {
        self.inner.sessions.lock().get(session_id).cloned()
    }

    /// Returns every currently attached session.
    #[must_use]
    pub fn sessions(&self) -> Vec<Session> {
        self.inner.sessions.lock().values().cloned().collect()
    }

    /// Returns the number of attached sessions.
    #[inline]
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    /// Returns the number of in-flight commands.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.commands.len()
    }

    /// Subscribes to connection-level events (frames with no session id,
    /// plus the target attach/detach notifications).
    #[must_use]
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Event> {
        self.inner.events.subscribe()
    }

    /// Returns `true` once the connection is closed or closing.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_fired()
    }

    /// Returns why the connection closed, or `None` while open.
    #[inline]
    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.closed.get()
    }

    /// Waits until the connection closes and returns the reason.
    pub async fn wait_close(&self) -> CloseReason {
        self.inner.closed.wait().await
    }

    /// Runtime driving this connection; used by the sync disposal bridge.
    pub(crate) fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }
}

// ============================================================================
// Connection - Lifecycle
// ============================================================================

impl Connection {
    /// Closes the connection.
    ///
    /// Idempotent: a second call while already closing/closed is a no-op.
    /// Marks the connection closed, rejects every in-flight command with a
    /// closed-target error tagged `reason`, closes every owned session with
    /// the same reason, then releases the transport.
    pub async fn close(&self, reason: CloseReason) {
        self.inner.close_with(reason).await;
    }

    /// Synchronously closes the connection and blocks until the close is
    /// fully complete.
    ///
    /// By the time this returns, [`Connection::is_closed`] is true for every
    /// observer and every waiter has received its terminal resolution. The
    /// close work runs on the runtime driving the receive loop, never on the
    /// blocked calling context.
    ///
    /// # Panics
    ///
    /// Panics if called from a current-thread runtime worker, where blocking
    /// would starve the loop the close depends on.
    pub fn dispose(&self) {
        let inner = Arc::clone(&self.inner);
        blocking::block_until_complete(&self.inner.runtime, async move {
            inner.close_with(CloseReason::ExplicitClose).await;
        });
    }
}

// ============================================================================
// ConnectionInner - Command Execution
// ============================================================================

impl ConnectionInner {
    /// Allocates an id, registers a waiter, writes the frame, and awaits
    /// the resolution.
    pub(crate) async fn execute(
        self: &Arc<Self>,
        session_id: Option<SessionId>,
        method: &str,
        params: Value,
    ) -> Result<Value> {
        if let Some(reason) = self.closed.get() {
            return Err(Error::target_closed(reason, "connection"));
        }

        let id = CommandId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.commands.insert(id, session_id.clone(), method, tx);

        // The close sweep may have run between the check above and the
        // insert. The state transition happens before the drain, so a late
        // insert either evicts itself here or was already rejected by the
        // sweep; both paths yield exactly one resolution.
        if let Some(reason) = self.closed.get() {
            if self.commands.remove(id) {
                return Err(Error::target_closed(reason, "connection"));
            }
            return rx.await?;
        }

        let frame = serde_json::to_string(&Command::new(id, method, session_id, params))?;
        trace!(id = %id, method = %method, "Sending command");

        if let Err(e) = self.transport.send(frame).await {
            error!(id = %id, error = %e, "Transport write failed");
            self.commands.remove(id);
            // The link is gone: run the same cascade a transport fault does,
            // then report the command as rejected by that close.
            self.close_with(CloseReason::TransportError).await;
            return Err(Error::target_closed(CloseReason::TransportError, "connection"));
        }

        rx.await?
    }

    /// Access for the session-scoped close sweep.
    pub(crate) fn commands(&self) -> &CommandWaiters {
        &self.commands
    }

    /// Drops a session from the routing table.
    pub(crate) fn remove_session(&self, session_id: &SessionId) {
        if self.sessions.lock().remove(session_id).is_some() {
            debug!(session_id = %session_id, "Session removed from routing table");
        }
    }
}

// ============================================================================
// ConnectionInner - Receive Loop
// ============================================================================

impl ConnectionInner {
    /// Consumes the transport's inbound stream until a terminal event.
    async fn run_receive_loop(inner: Arc<Self>, mut events: TransportRx) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Frame(text) => inner.dispatch_frame(&text),

                TransportEvent::Closed => {
                    debug!(endpoint = %inner.endpoint, "Transport closed");
                    inner.close_with(CloseReason::TransportClosed).await;
                    break;
                }

                TransportEvent::Error(message) => {
                    error!(endpoint = %inner.endpoint, error = %message, "Transport error");
                    inner.close_with(CloseReason::TransportError).await;
                    break;
                }
            }
        }

        // A dropped transport handle ends the stream without a terminal
        // event; the cascade is idempotent either way.
        inner.close_with(CloseReason::TransportClosed).await;
        debug!(endpoint = %inner.endpoint, "Receive loop terminated");
    }

    /// Routes one inbound frame. Runs on the receive loop only.
    fn dispatch_frame(self: &Arc<Self>, text: &str) {
        match serde_json::from_str::<Message>(text) {
            Ok(Message::Response(response)) => self.dispatch_response(response),
            Ok(Message::Event(event)) => self.dispatch_event(&event),
            Err(e) => {
                warn!(error = %e, frame_len = text.len(), "Discarding unparseable frame");
            }
        }
    }

    /// Resolves the command waiter matching a response frame.
    fn dispatch_response(&self, response: Response) {
        let id = response.id;
        let outcome = match response.error {
            Some(payload) => Err(Error::protocol(payload.code, payload.message)),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };

        if !self.commands.complete(id, outcome) {
            warn!(id = %id, "Response for unknown command");
        }
    }

    /// Routes an event frame to the session table, a session, or the
    /// connection bus.
    fn dispatch_event(self: &Arc<Self>, event: &Event) {
        match event.method.as_str() {
            TARGET_ATTACHED => {
                self.handle_attached(event);
                self.events.publish(event);
            }

            TARGET_DETACHED => {
                self.handle_detached(event);
                self.events.publish(event);
            }

            _ => {
                if let Some(session_id) = &event.session_id {
                    let session = self.sessions.lock().get(session_id).cloned();
                    match session {
                        Some(session) => session.dispatch(event),
                        None => {
                            debug!(
                                session_id = %session_id,
                                method = %event.method,
                                "Discarding frame for unknown session"
                            );
                        }
                    }
                } else {
                    self.events.publish(event);
                }
            }
        }
    }

    /// Registers the session announced by an attach notification.
    fn handle_attached(self: &Arc<Self>, event: &Event) {
        let Some(session_id) = event.get_str("sessionId").map(SessionId::new) else {
            warn!("Attach notification without sessionId");
            return;
        };
        let target_id = event
            .get_nested_str("targetInfo", "targetId")
            .map(TargetId::new)
            .unwrap_or_else(|| TargetId::new(""));

        let session = Session::new(session_id.clone(), target_id, Arc::downgrade(self));

        let mut sessions = self.sessions.lock();
        if sessions.contains_key(&session_id) {
            warn!(session_id = %session_id, "Duplicate attach for live session");
            return;
        }
        sessions.insert(session_id.clone(), session);
        drop(sessions);

        debug!(session_id = %session_id, "Session attached");
    }

    /// Closes and deregisters the session named by a detach notification.
    fn handle_detached(&self, event: &Event) {
        let Some(session_id) = event.get_str("sessionId").map(SessionId::new) else {
            warn!("Detach notification without sessionId");
            return;
        };

        let removed = self.sessions.lock().remove(&session_id);
        match removed {
            Some(session) => {
                debug!(session_id = %session_id, "Session detached");
                session.close_now(CloseReason::TargetDetached);
            }
            None => {
                debug!(session_id = %session_id, "Detach for unknown session");
            }
        }
    }
}

// ============================================================================
// ConnectionInner - Close Cascade
// ============================================================================

impl ConnectionInner {
    /// Runs the close cascade. Idempotent: only the first trigger's reason
    /// is recorded and only that caller drives the drain.
    pub(crate) async fn close_with(&self, reason: CloseReason) {
        if !self.closed.fire(reason) {
            return;
        }
        info!(endpoint = %self.endpoint, reason = %reason, "Connection closing");

        // Reject all in-flight commands, then close each session (its
        // predicate waiters reject before its detach notification fires).
        self.commands.reject_all(reason);

        let sessions: Vec<Session> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.close_now(reason);
        }

        self.transport.close().await;
        debug!(endpoint = %self.endpoint, "Connection closed");
    }
}

// ============================================================================
// Tests
// ============================================================================
