//! Per-target session over the shared connection.
//!
//! A [`Session`] is a logical sub-channel scoped to one remote target (a
//! page, worker, ...). Commands issued through it travel over the owning
//! connection's writer tagged with the session id; routed events come back
//! through [`Session::subscribe`] listeners and registered predicate
//! waiters.
//!
//! The back-reference to the connection is non-owning: a session never
//! controls the connection's lifetime, and once the connection closes the
//! session is already closed by the cascade.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::close::{CloseReason, CloseSignal};
use crate::connection::ConnectionInner;
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::identifiers::{SessionId, TargetId};
use crate::protocol::Event;
use crate::waiter::EventWaiters;

// ============================================================================
// Session
// ============================================================================

/// Handle to one per-target session.
///
/// Cheap to clone; all clones share the same underlying session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

/// Shared state between session handles and the connection's dispatch path.
struct SessionInner {
    /// Session identifier issued by the remote end.
    session_id: SessionId,
    /// Target this session is attached to.
    target_id: TargetId,
    /// Non-owning routing handle to the connection.
    connection: Weak<ConnectionInner>,
    /// Registered predicate waiters.
    waits: EventWaiters,
    /// Bus for events routed to this session.
    events: EventBus,
    /// Single-fire closed latch; monotonic once set.
    closed: CloseSignal,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.inner.session_id)
            .field("target_id", &self.inner.target_id)
            .field("closed", &self.inner.closed.get())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Session - Constructor
// ============================================================================

impl Session {
    /// Creates a session handle. Called by the connection when a target
    /// attaches.
    pub(crate) fn new(
        session_id: SessionId,
        target_id: TargetId,
        connection: Weak<ConnectionInner>,
    ) -> Self {
        debug!(session_id = %session_id, target_id = %target_id, "Session created");
        Self {
            inner: Arc::new(SessionInner {
                session_id,
                target_id,
                connection,
                waits: EventWaiters::new(),
                events: EventBus::new(),
                closed: CloseSignal::new(),
            }),
        }
    }
}

// ============================================================================
// Session - Accessors
// ============================================================================

impl Session {
    /// Returns the session identifier.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    /// Returns the target identifier.
    #[inline]
    #[must_use]
    pub fn target_id(&self) -> &TargetId {
        &self.inner.target_id
    }

    /// Returns `true` once the session is closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_fired()
    }

    /// Returns why the session closed, or `None` while attached.
    #[inline]
    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.closed.get()
    }

    /// Waits until the session closes and returns the reason.
    ///
    /// Fires exactly once per waiter; completes immediately if the session
    /// is already closed.
    pub async fn wait_close(&self) -> CloseReason {
        self.inner.closed.wait().await
    }

    /// Subscribes to events routed to this session.
    #[must_use]
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Event> {
        self.inner.events.subscribe()
    }

    /// Number of registered predicate waiters.
    #[cfg(test)]
    pub(crate) fn event_waiter_count(&self) -> usize {
        self.inner.waits.len()
    }
}

// ============================================================================
// Session - Commands
// ============================================================================

impl Session {
    /// Sends a command scoped to this session and awaits its response.
    ///
    /// # Errors
    ///
    /// - [`Error::TargetClosed`] if the session or its connection is closed,
    ///   or closes while the command is in flight
    /// - [`Error::Protocol`] if the remote end rejects the command
    pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
        if let Some(reason) = self.inner.closed.get() {
            return Err(Error::target_closed(reason, "session"));
        }

        let Some(connection) = self.inner.connection.upgrade() else {
            let reason = self
                .inner
                .closed
                .get()
                .unwrap_or(CloseReason::TransportClosed);
            return Err(Error::target_closed(reason, "session"));
        };

        connection
            .execute(Some(self.inner.session_id.clone()), method, params)
            .await
    }
}

// ============================================================================
// Session - Event Waits
// ============================================================================

impl Session {
    /// Waits until an event routed to this session matches `predicate`.
    ///
    /// The first of {match, deadline, close} wins and the others become
    /// no-ops. A waiter that matched before the close resolves with the
    /// match; one that matched before the deadline resolves with the match.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if `timeout` elapses with no match and no close
    /// - [`Error::TargetClosed`] if the session or connection closes first
    pub async fn wait_for_event<P>(&self, predicate: P, timeout: Duration) -> Result<Event>
    where
        P: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        if let Some(reason) = self.inner.closed.get() {
            return Err(Error::target_closed(reason, "session"));
        }

        let (tx, mut rx) = oneshot::channel();
        let waiter_id = self.inner.waits.insert(Box::new(predicate), tx);

        // A close sweep may have drained the registry between the check and
        // the insert; the state transition precedes the drain, so self-evict
        // if the latch is set and the entry is still ours.
        if let Some(reason) = self.inner.closed.get()
            && self.inner.waits.remove(waiter_id)
        {
            return Err(Error::target_closed(reason, "session"));
        }

        let sleep = tokio::time::sleep(timeout);
        tokio::select! {
            outcome = &mut rx => outcome?,
            () = sleep => {
                if self.inner.waits.remove(waiter_id) {
                    Err(Error::timeout(
                        format!("event wait on session {}", self.inner.session_id),
                        timeout.as_millis() as u64,
                    ))
                } else {
                    // Lost the removal race: a match or a close sweep took
                    // the waiter first, and that outcome wins the deadline.
                    rx.await?
                }
            }
        }
    }
}

// ============================================================================
// Session - Lifecycle
// ============================================================================

impl Session {
    /// Closes the session.
    ///
    /// Idempotent. Rejects every outstanding command and predicate waiter
    /// registered on this session with a closed-target error tagged
    /// `reason`, marks the session closed, removes it from the connection's
    /// routing table, and notifies close listeners exactly once.
    pub fn close(&self, reason: CloseReason) {
        self.close_now(reason);
    }

    /// Cascade entry point shared by explicit closes, detach notifications,
    /// and the connection's close sweep.
    pub(crate) fn close_now(&self, reason: CloseReason) {
        if !self.inner.closed.fire(reason) {
            return;
        }
        debug!(session_id = %self.inner.session_id, reason = %reason, "Session closing");

        // Leaf first: this session's waiters observe the rejection at the
        // moment the session can no longer satisfy them, before the
        // detachment propagates upward.
        if let Some(connection) = self.inner.connection.upgrade() {
            connection.commands().reject_session(&self.inner.session_id, reason);
        }
        self.inner.waits.reject_all(reason);

        if let Some(connection) = self.inner.connection.upgrade() {
            connection.remove_session(&self.inner.session_id);
        }
    }

    /// Routes one event to this session's waiters and listeners.
    ///
    /// Runs on the connection's receive loop. Frames arriving after the
    /// session closed are logged and discarded.
    pub(crate) fn dispatch(&self, event: &Event) {
        if self.inner.closed.is_fired() {
            debug!(
                session_id = %self.inner.session_id,
                method = %event.method,
                "Discarding frame for closed session"
            );
            return;
        }

        self.inner.waits.dispatch(event);
        self.inner.events.publish(event);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::protocol::TARGET_ATTACHED;
    use crate::transport::loopback::{LoopbackTransport, sent_command_id};
    use serde_json::json;

    async fn session_over_loopback() -> (Connection, Arc<LoopbackTransport>, Session) {
        let (transport, events, _sent) = LoopbackTransport::channel();
        let connection = Connection::new(
            "loopback",
            transport.clone() as Arc<dyn crate::transport::Transport>,
            events,
        );
        transport.inject_event(
            TARGET_ATTACHED,
            None,
            json!({
                "sessionId": "sess-1",
                "targetInfo": { "targetId": "T1", "type": "page" }
            }),
        );
        let session_id = SessionId::new("sess-1");
        for _ in 0..100 {
            if let Some(session) = connection.session(&session_id) {
                return (connection, transport, session);
            }
            tokio::task::yield_now().await;
        }
        panic!("session was never attached");
    }

    async fn session_with_sent() -> (
        Connection,
        Arc<LoopbackTransport>,
        Session,
        mpsc::UnboundedReceiver<String>,
    ) {
        let (transport, events, sent) = LoopbackTransport::channel();
        let connection = Connection::new(
            "loopback",
            transport.clone() as Arc<dyn crate::transport::Transport>,
            events,
        );
        transport.inject_event(
            TARGET_ATTACHED,
            None,
            json!({
                "sessionId": "sess-1",
                "targetInfo": { "targetId": "T1", "type": "page" }
            }),
        );
        let session_id = SessionId::new("sess-1");
        for _ in 0..100 {
            if let Some(session) = connection.session(&session_id) {
                return (connection, transport, session, sent);
            }
            tokio::task::yield_now().await;
        }
        panic!("session was never attached");
    }

    #[tokio::test]
    async fn test_send_is_tagged_with_session_id() {
        let (_connection, transport, session, mut sent) = session_with_sent().await;

        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.send("Network.enable", json!({})).await }
        });

        let frame = sent.recv().await.expect("frame");
        assert!(frame.contains("\"sessionId\":\"sess-1\""));
        transport.inject_response(sent_command_id(&frame), json!({}));
        pending.await.expect("join").expect("success");
    }

    #[tokio::test]
    async fn test_send_on_closed_session_fails_fast() {
        let (_connection, _transport, session, mut sent) = session_with_sent().await;

        session.close(CloseReason::ExplicitClose);

        let err = session
            .send("Network.enable", json!({}))
            .await
            .expect_err("closed");
        assert_eq!(err.close_reason(), Some(CloseReason::ExplicitClose));
        assert!(err.to_string().contains("Target closed"));
        assert!(sent.try_recv().is_err(), "no frame may be written");
    }

    #[tokio::test]
    async fn test_wait_for_event_resolves_on_match() {
        let (_connection, transport, session) = session_over_loopback().await;

        let wait = tokio::spawn({
            let session = session.clone();
            async move {
                session
                    .wait_for_event(
                        |event| event.method == "Network.responseReceived",
                        Duration::from_secs(30),
                    )
                    .await
            }
        });

        // Wait until the predicate is registered before injecting.
        for _ in 0..100 {
            if session.event_waiter_count() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }

        transport.inject_event("Network.requestWillBeSent", Some("sess-1"), json!({}));
        transport.inject_event("Network.responseReceived", Some("sess-1"), json!({ "status": 200 }));

        let event = wait.await.expect("join").expect("match");
        assert_eq!(event.method, "Network.responseReceived");
        assert_eq!(session.event_waiter_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_event_times_out_with_timeout_error() {
        let (_connection, _transport, session) = session_over_loopback().await;

        let err = session
            .wait_for_event(|_| false, Duration::from_millis(250))
            .await
            .expect_err("deadline");

        assert!(err.is_timeout());
        let rendered = err.to_string();
        assert!(rendered.contains("Timeout after 250ms"), "got: {rendered}");
        assert!(!rendered.contains("Target closed"), "got: {rendered}");
        assert_eq!(session.event_waiter_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_event_rejects_on_session_close() {
        let (_connection, _transport, session) = session_over_loopback().await;

        let wait = tokio::spawn({
            let session = session.clone();
            async move {
                session
                    .wait_for_event(|_| false, Duration::from_secs(30))
                    .await
            }
        });
        for _ in 0..100 {
            if session.event_waiter_count() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }

        session.close(CloseReason::ExplicitClose);

        let err = wait.await.expect("join").expect_err("rejected");
        assert_eq!(err.close_reason(), Some(CloseReason::ExplicitClose));
        assert!(!err.is_timeout());
    }

    #[tokio::test]
    async fn test_wait_for_event_rejects_on_connection_close() {
        let (connection, _transport, session) = session_over_loopback().await;

        let wait = tokio::spawn({
            let session = session.clone();
            async move {
                session
                    .wait_for_event(|_| false, Duration::from_secs(30))
                    .await
            }
        });
        for _ in 0..100 {
            if session.event_waiter_count() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }

        connection.close(CloseReason::TransportClosed).await;

        let err = wait.await.expect("join").expect_err("rejected");
        assert_eq!(err.close_reason(), Some(CloseReason::TransportClosed));
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_match_before_close_wins() {
        let (_connection, transport, session) = session_over_loopback().await;

        let wait = tokio::spawn({
            let session = session.clone();
            async move {
                session
                    .wait_for_event(
                        |event| event.method == "Page.loadEventFired",
                        Duration::from_secs(30),
                    )
                    .await
            }
        });
        for _ in 0..100 {
            if session.event_waiter_count() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }

        transport.inject_event("Page.loadEventFired", Some("sess-1"), json!({}));
        // Let the receive loop resolve the waiter before the close sweep.
        for _ in 0..100 {
            if session.event_waiter_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        session.close(CloseReason::ExplicitClose);

        let event = wait.await.expect("join").expect("match wins over close");
        assert_eq!(event.method, "Page.loadEventFired");
    }

    #[tokio::test]
    async fn test_double_close_records_single_reason() {
        let (_connection, _transport, session) = session_over_loopback().await;

        let first = std::thread::spawn({
            let session = session.clone();
            move || session.close(CloseReason::ExplicitClose)
        });
        let second = std::thread::spawn({
            let session = session.clone();
            move || session.close(CloseReason::TargetDetached)
        });
        first.join().expect("thread");
        second.join().expect("thread");

        let reason = session.close_reason().expect("closed");
        assert!(matches!(
            reason,
            CloseReason::ExplicitClose | CloseReason::TargetDetached
        ));
        assert_eq!(session.wait_close().await, reason);
    }

    #[tokio::test]
    async fn test_close_notifies_listener_exactly_once() {
        let (_connection, _transport, session) = session_over_loopback().await;

        let observed = tokio::spawn({
            let session = session.clone();
            async move { session.wait_close().await }
        });

        session.close(CloseReason::ExplicitClose);
        session.close(CloseReason::TargetDetached);

        assert_eq!(observed.await.expect("join"), CloseReason::ExplicitClose);
        assert_eq!(session.close_reason(), Some(CloseReason::ExplicitClose));
    }

    #[tokio::test]
    async fn test_waiter_registered_on_closed_session_rejects() {
        let (_connection, _transport, session) = session_over_loopback().await;
        session.close(CloseReason::TargetDetached);

        let err = session
            .wait_for_event(|_| true, Duration::from_secs(1))
            .await
            .expect_err("closed");
        assert_eq!(err.close_reason(), Some(CloseReason::TargetDetached));
    }

    #[tokio::test]
    async fn test_pending_wait_stays_pending_until_event() {
        let (_connection, transport, session) = session_over_loopback().await;

        let mut wait = tokio_test::task::spawn({
            let session = session.clone();
            async move {
                session
                    .wait_for_event(
                        |event| event.method == "Page.loadEventFired",
                        Duration::from_secs(30),
                    )
                    .await
            }
        });

        assert!(wait.poll().is_pending());
        for _ in 0..100 {
            if session.event_waiter_count() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }

        transport.inject_event("Page.loadEventFired", Some("sess-1"), json!({}));
        for _ in 0..100 {
            if session.event_waiter_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(wait.is_woken());
        match wait.poll() {
            std::task::Poll::Ready(outcome) => {
                assert_eq!(outcome.expect("match").method, "Page.loadEventFired");
            }
            std::task::Poll::Pending => panic!("wait must be ready after match"),
        }
    }
}
