//! Browser context: an isolated group of pages.
//!
//! Contexts materialize from the `browserContextId` carried by attach
//! notifications; targets without one belong to the default context. A
//! context owns its page registry top-down; pages keep only a non-owning
//! back-reference for removal.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::browser::BrowserInner;
use crate::browser::page::Page;
use crate::close::{CloseReason, CloseSignal};
use crate::identifiers::{BrowserContextId, SessionId, TargetId};
use crate::session::Session;

// ============================================================================
// BrowserContext
// ============================================================================

/// Handle to one browser context.
///
/// Cheap to clone; all clones share the same underlying context.
#[derive(Clone)]
pub struct BrowserContext {
    pub(crate) inner: Arc<ContextInner>,
}

pub(crate) struct ContextInner {
    /// Context identifier; `None` for the default context.
    id: Option<BrowserContextId>,
    /// Owning browser, for registry removal on close.
    browser: Weak<BrowserInner>,
    /// Pages attached in this context, keyed by target.
    pages: Mutex<FxHashMap<TargetId, Page>>,
    /// Single-fire closed latch.
    closed: CloseSignal,
}

impl std::fmt::Debug for BrowserContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserContext")
            .field("id", &self.inner.id)
            .field("pages", &self.inner.pages.lock().len())
            .field("closed", &self.inner.closed.get())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// BrowserContext - Constructor
// ============================================================================

impl BrowserContext {
    /// Creates a context node. Called by the browser.
    pub(crate) fn new(id: Option<BrowserContextId>, browser: Weak<BrowserInner>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id,
                browser,
                pages: Mutex::new(FxHashMap::default()),
                closed: CloseSignal::new(),
            }),
        }
    }
}

// ============================================================================
// BrowserContext - Accessors
// ============================================================================

impl BrowserContext {
    /// Returns the context identifier; `None` for the default context.
    #[inline]
    #[must_use]
    pub fn id(&self) -> Option<&BrowserContextId> {
        self.inner.id.as_ref()
    }

    /// Returns every page currently attached in this context.
    #[must_use]
    pub fn pages(&self) -> Vec<Page> {
        self.inner.pages.lock().values().cloned().collect()
    }

    /// Returns the page for `target_id`, if attached in this context.
    #[must_use]
    pub fn page_for_target(&self, target_id: &TargetId) -> Option<Page> {
        self.inner.pages.lock().get(target_id).cloned()
    }

    /// Returns the number of attached pages.
    #[inline]
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.inner.pages.lock().len()
    }

    /// Returns `true` once the context is closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_fired()
    }

    /// Returns why the context closed, or `None` while open.
    #[inline]
    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.closed.get()
    }

    /// Waits until the context closes and returns the reason.
    pub async fn wait_close(&self) -> CloseReason {
        self.inner.closed.wait().await
    }
}

// ============================================================================
// BrowserContext - Lifecycle
// ============================================================================

impl BrowserContext {
    /// Closes the context and every page in it.
    ///
    /// Idempotent; pages close first so their session waiters reject before
    /// the context reports closed.
    pub fn close(&self, reason: CloseReason) {
        self.inner.close_now(reason);
    }

    /// Registers a freshly attached session as a page in this context.
    pub(crate) fn adopt(&self, session: Session) -> Page {
        let target_id = session.target_id().clone();
        let page = Page::new(session, Arc::downgrade(&self.inner));
        self.inner
            .pages
            .lock()
            .insert(target_id.clone(), page.clone());
        debug!(target_id = %target_id, context = ?self.inner.id, "Page adopted");
        page
    }
}

impl ContextInner {
    /// Cascade entry point shared by explicit closes and browser teardown.
    pub(crate) fn close_now(&self, reason: CloseReason) {
        if !self.closed.fire(reason) {
            return;
        }
        debug!(context = ?self.id, reason = %reason, "Context closing");

        let pages: Vec<Page> = self.pages.lock().drain().map(|(_, p)| p).collect();
        for page in pages {
            page.close(reason);
        }

        if let Some(id) = &self.id
            && let Some(browser) = self.browser.upgrade()
        {
            browser.remove_context(id);
        }
    }

    /// Drops a page from the registry.
    pub(crate) fn remove_page(&self, target_id: &TargetId) {
        if self.pages.lock().remove(target_id).is_some() {
            debug!(target_id = %target_id, context = ?self.id, "Page removed from context");
        }
    }

    /// Removes the page carrying `session_id`, if any, and returns it.
    pub(crate) fn take_page_for_session(&self, session_id: &SessionId) -> Option<Page> {
        let mut pages = self.pages.lock();
        let target_id = pages
            .iter()
            .find(|(_, page)| page.session_id() == session_id)
            .map(|(target_id, _)| target_id.clone())?;
        pages.remove(&target_id)
    }
}
