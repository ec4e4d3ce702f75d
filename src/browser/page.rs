//! Page entity: one attached target and its session.
//!
//! A [`Page`] is a thin hierarchy node over a [`Session`]. Its closed state
//! is the session's closed state; closing the page closes the session and
//! removes the page from its context's registry.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::browser::context::ContextInner;
use crate::close::CloseReason;
use crate::error::Result;
use crate::identifiers::{SessionId, TargetId};
use crate::protocol::Event;
use crate::session::Session;

// ============================================================================
// Page
// ============================================================================

/// Handle to one page-level target.
///
/// Cheap to clone; all clones share the same underlying page.
#[derive(Clone)]
pub struct Page {
    inner: Arc<PageInner>,
}

struct PageInner {
    /// The session carrying this page's traffic.
    session: Session,
    /// Owning context, for registry removal on close.
    context: Weak<ContextInner>,
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("session_id", self.inner.session.session_id())
            .field("target_id", self.inner.session.target_id())
            .field("closed", &self.inner.session.close_reason())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Page - Constructor
// ============================================================================

impl Page {
    /// Wraps a session into a page node. Called by the browser watcher.
    pub(crate) fn new(session: Session, context: Weak<ContextInner>) -> Self {
        Self {
            inner: Arc::new(PageInner { session, context }),
        }
    }
}

// ============================================================================
// Page - Accessors
// ============================================================================

impl Page {
    /// Returns the underlying session.
    #[inline]
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// Returns the session identifier.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        self.inner.session.session_id()
    }

    /// Returns the target identifier.
    #[inline]
    #[must_use]
    pub fn target_id(&self) -> &TargetId {
        self.inner.session.target_id()
    }

    /// Returns `true` once the page's session is closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.session.is_closed()
    }

    /// Returns why the page closed, or `None` while open.
    #[inline]
    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.session.close_reason()
    }

    /// Waits until the page closes and returns the reason.
    pub async fn wait_close(&self) -> CloseReason {
        self.inner.session.wait_close().await
    }

    /// Subscribes to events routed to this page's session.
    #[must_use]
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Event> {
        self.inner.session.subscribe()
    }
}

// ============================================================================
// Page - Operations
// ============================================================================

impl Page {
    /// Sends a command scoped to this page's session.
    ///
    /// # Errors
    ///
    /// See [`Session::send`].
    pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
        self.inner.session.send(method, params).await
    }

    /// Waits for an event on this page's session.
    ///
    /// # Errors
    ///
    /// See [`Session::wait_for_event`].
    pub async fn wait_for_event<P>(&self, predicate: P, timeout: Duration) -> Result<Event>
    where
        P: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.inner.session.wait_for_event(predicate, timeout).await
    }

    /// Closes the page.
    ///
    /// Idempotent. Rejects the session's outstanding waiters with a
    /// closed-target error tagged `reason` and removes the page from its
    /// context.
    pub fn close(&self, reason: CloseReason) {
        debug!(target_id = %self.target_id(), reason = %reason, "Page closing");
        self.inner.session.close_now(reason);

        if let Some(context) = self.inner.context.upgrade() {
            context.remove_page(self.target_id());
        }
    }
}
