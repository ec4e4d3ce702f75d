//! Browser hierarchy and close cascade.
//!
//! The hierarchy mirrors the remote target tree:
//!
//! ```text
//! Browser ── BrowserContext(s) ── Page(s) ── Session ── Connection
//! ```
//!
//! Ownership runs top-down through identifier-keyed registries (browser
//! owns context entries, context owns page entries); every back-reference
//! is non-owning, so no ownership cycles exist.
//!
//! Closure may start at any level (an explicit close, a remote detach, or
//! the transport dropping) and always collapses into one effective close
//! per node. Waiter resolution is leaf-first: a page's session waiters
//! reject before detachment propagates upward, so a caller awaiting a
//! page-level operation observes the rejection the moment the session can
//! no longer satisfy it.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Browser`] | Top of the hierarchy, bound to one [`Connection`] |
//! | [`BrowserContext`] | Isolated group of pages |
//! | [`Page`] | One attached target and its session |

// ============================================================================
// Submodules
// ============================================================================

/// Browser context entities.
pub mod context;

/// Page entities.
pub mod page;

// ============================================================================
// Re-exports
// ============================================================================

pub use context::BrowserContext;
pub use page::Page;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::blocking;
use crate::close::{CloseReason, CloseSignal};
use crate::connection::Connection;
use crate::identifiers::{BrowserContextId, SessionId, TargetId};
use crate::protocol::{Event, TARGET_ATTACHED, TARGET_DETACHED};

// ============================================================================
// Browser
// ============================================================================

/// Top of the target hierarchy, bound to one control connection.
///
/// The browser mirrors attach/detach notifications into per-context page
/// registries and drives the downward close cascade; a transport-initiated
/// connection close propagates upward and marks the whole hierarchy closed.
///
/// Cheap to clone; all clones share the same underlying browser.
#[derive(Clone)]
pub struct Browser {
    inner: Arc<BrowserInner>,
}

pub(crate) struct BrowserInner {
    /// The control connection.
    connection: Connection,
    /// Context for targets without a `browserContextId`.
    default_context: Mutex<Option<BrowserContext>>,
    /// Contexts keyed by identifier.
    contexts: Mutex<FxHashMap<BrowserContextId, BrowserContext>>,
    /// Single-fire closed latch.
    closed: CloseSignal,
}

impl std::fmt::Debug for Browser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Browser")
            .field("endpoint", &self.inner.connection.endpoint())
            .field("contexts", &self.inner.contexts.lock().len())
            .field("closed", &self.inner.closed.get())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Browser - Constructor
// ============================================================================

impl Browser {
    /// Binds a browser to a connection and starts mirroring its target
    /// notifications.
    ///
    /// Subscribe happens here, so only targets attaching after this call
    /// appear in the page registries.
    #[must_use]
    pub fn attach(connection: Connection) -> Self {
        let events = connection.subscribe();

        let inner = Arc::new(BrowserInner {
            connection,
            default_context: Mutex::new(None),
            contexts: Mutex::new(FxHashMap::default()),
            closed: CloseSignal::new(),
        });
        *inner.default_context.lock() =
            Some(BrowserContext::new(None, Arc::downgrade(&inner)));

        tokio::spawn(BrowserInner::run_watcher(Arc::clone(&inner), events));

        Self { inner }
    }
}

// ============================================================================
// Browser - Accessors
// ============================================================================

impl Browser {
    /// Returns the underlying connection.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    /// Returns the default context.
    #[must_use]
    pub fn default_context(&self) -> BrowserContext {
        self.inner.default_context_handle()
    }

    /// Returns every non-default context.
    #[must_use]
    pub fn contexts(&self) -> Vec<BrowserContext> {
        self.inner.contexts.lock().values().cloned().collect()
    }

    /// Returns every page across all contexts.
    #[must_use]
    pub fn pages(&self) -> Vec<Page> {
        let mut pages = self.default_context().pages();
        for context in self.contexts() {
            pages.extend(context.pages());
        }
        pages
    }

    /// Returns the page attached for `target_id`, if any.
    #[must_use]
    pub fn page_for_target(&self, target_id: &TargetId) -> Option<Page> {
        if let Some(page) = self.default_context().page_for_target(target_id) {
            return Some(page);
        }
        self.contexts()
            .into_iter()
            .find_map(|context| context.page_for_target(target_id))
    }

    /// Returns `true` once the browser is closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_fired()
    }

    /// Returns why the browser closed, or `None` while open.
    #[inline]
    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.closed.get()
    }

    /// Waits until the browser closes and returns the reason.
    pub async fn wait_close(&self) -> CloseReason {
        self.inner.closed.wait().await
    }
}

// ============================================================================
// Browser - Lifecycle
// ============================================================================

impl Browser {
    /// Closes the browser, every context and page under it, and the
    /// connection.
    ///
    /// Idempotent. Pages and sessions close first, so their waiters reject
    /// before the connection finishes tearing down.
    pub async fn close(&self) {
        if !self.inner.closed.fire(CloseReason::ExplicitClose) {
            return;
        }
        info!(endpoint = %self.inner.connection.endpoint(), "Browser closing");

        self.inner.close_children(CloseReason::ExplicitClose);
        self.inner.connection.close(CloseReason::ExplicitClose).await;
    }

    /// Synchronously closes the browser and blocks until the whole cascade
    /// is complete.
    ///
    /// By the time this returns, the browser, its contexts and pages, and
    /// the connection are all observably closed.
    ///
    /// # Panics
    ///
    /// Panics if called from a current-thread runtime worker (see
    /// [`Connection::dispose`]).
    pub fn dispose(&self) {
        let browser = self.clone();
        blocking::block_until_complete(self.inner.connection.runtime(), async move {
            browser.close().await;
        });
    }
}

// ============================================================================
// BrowserInner - Watcher
// ============================================================================

impl BrowserInner {
    /// Mirrors target notifications into the page registries and observes
    /// connection closure.
    async fn run_watcher(inner: Arc<Self>, mut events: mpsc::UnboundedReceiver<Event>) {
        loop {
            tokio::select! {
                maybe = events.recv() => match maybe {
                    Some(event) => inner.route_target_event(&event),
                    None => break,
                },

                reason = inner.connection.wait_close() => {
                    inner.mark_closed(reason);
                    break;
                }
            }
        }

        // The event stream can end without the close branch winning; make
        // sure the hierarchy reflects the terminal state either way.
        let reason = inner
            .connection
            .close_reason()
            .unwrap_or(CloseReason::TransportClosed);
        inner.mark_closed(reason);
        debug!("Browser watcher terminated");
    }

    /// Handles one connection-level notification.
    fn route_target_event(self: &Arc<Self>, event: &Event) {
        match event.method.as_str() {
            TARGET_ATTACHED => {
                let Some(session_id) = event.get_str("sessionId").map(SessionId::new) else {
                    return;
                };
                let Some(session) = self.connection.session(&session_id) else {
                    debug!(session_id = %session_id, "Attach for already-closed session");
                    return;
                };

                let context = match event
                    .get_nested_str("targetInfo", "browserContextId")
                    .map(BrowserContextId::new)
                {
                    Some(id) => self.context_or_create(id),
                    None => self.default_context_handle(),
                };
                context.adopt(session);
            }

            TARGET_DETACHED => {
                let Some(session_id) = event.get_str("sessionId").map(SessionId::new) else {
                    return;
                };
                self.drop_page_for_session(&session_id);
            }

            _ => {}
        }
    }

    /// Marks the whole hierarchy closed after a connection-initiated close.
    fn mark_closed(&self, reason: CloseReason) {
        if !self.closed.fire(reason) {
            return;
        }
        info!(reason = %reason, "Browser closed");
        self.close_children(reason);
    }

    /// Closes every context (and transitively every page).
    fn close_children(&self, reason: CloseReason) {
        let contexts: Vec<BrowserContext> =
            self.contexts.lock().drain().map(|(_, c)| c).collect();
        for context in contexts {
            context.inner.close_now(reason);
        }
        self.default_context_handle().inner.close_now(reason);
    }

    /// Returns the context for `id`, creating it on first sight.
    fn context_or_create(self: &Arc<Self>, id: BrowserContextId) -> BrowserContext {
        let mut contexts = self.contexts.lock();
        contexts
            .entry(id.clone())
            .or_insert_with(|| BrowserContext::new(Some(id), Arc::downgrade(self)))
            .clone()
    }

    /// Returns the default context handle.
    fn default_context_handle(&self) -> BrowserContext {
        self.default_context
            .lock()
            .clone()
            .unwrap_or_else(|| BrowserContext::new(None, std::sync::Weak::new()))
    }

    /// Removes the page carrying `session_id` from whichever context holds
    /// it.
    fn drop_page_for_session(&self, session_id: &SessionId) {
        if let Some(page) = self
            .default_context_handle()
            .inner
            .take_page_for_session(session_id)
        {
            debug!(target_id = %page.target_id(), "Page dropped after detach");
            return;
        }
        let contexts: Vec<BrowserContext> =
            self.contexts.lock().values().cloned().collect();
        for context in contexts {
            if let Some(page) = context.inner.take_page_for_session(session_id) {
                debug!(target_id = %page.target_id(), "Page dropped after detach");
                return;
            }
        }
    }

    /// Drops a context from the registry.
    pub(crate) fn remove_context(&self, id: &BrowserContextId) {
        if self.contexts.lock().remove(id).is_some() {
            debug!(context = %id, "Context removed");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
