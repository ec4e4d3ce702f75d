//! Registries for outstanding asynchronous operations.
//!
//! Two kinds of waiter exist:
//!
//! - **Command waiters**: one per in-flight command, keyed by correlation
//!   id, resolved when the matching response arrives or a close sweep
//!   rejects them.
//! - **Predicate waiters**: registered by `wait_for_event`, resolved by
//!   streaming every incoming event through the registered predicates.
//!
//! Both follow the same discipline: insertion is insert-if-absent, and the
//! only way to resolve a waiter is to *remove* it from the registry and
//! consume its completion handle. The handle is a `oneshot::Sender`, so a
//! second resolution is unrepresentable; a close sweep racing a normal
//! resolution can never double-fire because only one of them gets the entry
//! out of the map.
//!
//! All sweeps drain under the lock and resolve outside it. No lock is ever
//! held across an await point.

// ============================================================================
// Imports
// ============================================================================

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::close::CloseReason;
use crate::error::{Error, Result};
use crate::identifiers::{CommandId, SessionId, WaiterId};
use crate::protocol::Event;

// ============================================================================
// Types
// ============================================================================

/// Completion handle for an in-flight command.
type CommandTx = oneshot::Sender<Result<Value>>;

/// Completion handle for a predicate waiter.
type EventTx = oneshot::Sender<Result<Event>>;

/// Matching function evaluated against each incoming event.
pub type EventPredicate = Box<dyn Fn(&Event) -> bool + Send + Sync>;

// ============================================================================
// CommandWaiters
// ============================================================================

/// An in-flight command awaiting its response.
struct PendingCommand {
    /// Session the command was issued through; `None` for root commands.
    session_id: Option<SessionId>,
    /// Method name, kept for rejection diagnostics.
    method: String,
    /// Completion handle.
    tx: CommandTx,
}

/// Registry of in-flight commands, keyed by correlation id.
#[derive(Default)]
pub(crate) struct CommandWaiters {
    pending: Mutex<FxHashMap<CommandId, PendingCommand>>,
}

impl CommandWaiters {
    /// Creates an empty registry.
    #[must_use]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter for `id`.
    ///
    /// Correlation ids come from a monotonic counter and are never reused,
    /// so a collision is a programming error; the existing waiter is kept
    /// and the new handle is dropped (its caller observes a closed channel).
    pub(crate) fn insert(
        &self,
        id: CommandId,
        session_id: Option<SessionId>,
        method: &str,
        tx: CommandTx,
    ) {
        let mut pending = self.pending.lock();
        debug_assert!(!pending.contains_key(&id), "command id reused: {id}");
        pending.entry(id).or_insert(PendingCommand {
            session_id,
            method: method.to_string(),
            tx,
        });
    }

    /// Removes the waiter for `id` and resolves it with `outcome`.
    ///
    /// Returns `false` if no waiter was registered (already resolved by a
    /// sweep, or a response for an unknown id).
    pub(crate) fn complete(&self, id: CommandId, outcome: Result<Value>) -> bool {
        let entry = self.pending.lock().remove(&id);
        match entry {
            Some(pending) => {
                let _ = pending.tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Removes the waiter for `id` without resolving it.
    ///
    /// Used by a sender whose transport write failed: the caller still owns
    /// the error to report.
    pub(crate) fn remove(&self, id: CommandId) -> bool {
        self.pending.lock().remove(&id).is_some()
    }

    /// Rejects every waiter issued through `session_id` with a
    /// closed-target error tagged `reason`.
    pub(crate) fn reject_session(&self, session_id: &SessionId, reason: CloseReason) {
        let drained: Vec<PendingCommand> = {
            let mut pending = self.pending.lock();
            let ids: Vec<CommandId> = pending
                .iter()
                .filter(|(_, entry)| entry.session_id.as_ref() == Some(session_id))
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| pending.remove(&id)).collect()
        };

        if !drained.is_empty() {
            debug!(
                session_id = %session_id,
                count = drained.len(),
                reason = %reason,
                "Rejecting session command waiters"
            );
        }

        for entry in drained {
            let _ = entry
                .tx
                .send(Err(Error::target_closed(reason, "session")));
        }
    }

    /// Rejects every outstanding waiter with a closed-target error tagged
    /// `reason`.
    pub(crate) fn reject_all(&self, reason: CloseReason) {
        let drained: Vec<(CommandId, PendingCommand)> =
            self.pending.lock().drain().collect();

        if !drained.is_empty() {
            warn!(count = drained.len(), reason = %reason, "Rejecting all command waiters");
        }

        for (id, entry) in drained {
            debug!(id = %id, method = %entry.method, "Command rejected by close sweep");
            let _ = entry
                .tx
                .send(Err(Error::target_closed(reason, "connection")));
        }
    }

    /// Returns the number of in-flight commands.
    #[inline]
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

// ============================================================================
// EventWaiters
// ============================================================================

/// A registered predicate waiter.
struct PendingWait {
    predicate: EventPredicate,
    tx: EventTx,
}

/// Registry of predicate waiters for one session.
#[derive(Default)]
pub(crate) struct EventWaiters {
    pending: Mutex<FxHashMap<WaiterId, PendingWait>>,
}

impl EventWaiters {
    /// Creates an empty registry.
    #[must_use]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a predicate waiter and returns its identity.
    pub(crate) fn insert(&self, predicate: EventPredicate, tx: EventTx) -> WaiterId {
        let id = WaiterId::generate();
        self.pending.lock().insert(id, PendingWait { predicate, tx });
        id
    }

    /// Feeds `event` to every registered predicate, removing and resolving
    /// every waiter that matches.
    ///
    /// A waiter resolves at most once: matching entries leave the registry
    /// before their handles fire, so they are never evaluated again.
    pub(crate) fn dispatch(&self, event: &Event) {
        let matched: Vec<PendingWait> = {
            let mut pending = self.pending.lock();
            let ids: Vec<WaiterId> = pending
                .iter()
                .filter(|(_, wait)| (wait.predicate)(event))
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| pending.remove(&id)).collect()
        };

        for wait in matched {
            let _ = wait.tx.send(Ok(event.clone()));
        }
    }

    /// Removes the waiter `id` without resolving it.
    ///
    /// Called by the waiting side when its deadline elapses. Returns `false`
    /// if the waiter was already taken by a match or a close sweep; the
    /// caller must then defer to that concurrent resolution instead of
    /// reporting a timeout.
    pub(crate) fn remove(&self, id: WaiterId) -> bool {
        self.pending.lock().remove(&id).is_some()
    }

    /// Rejects every registered waiter with a closed-target error tagged
    /// `reason`.
    pub(crate) fn reject_all(&self, reason: CloseReason) {
        let drained: Vec<(WaiterId, PendingWait)> = self.pending.lock().drain().collect();

        if !drained.is_empty() {
            debug!(count = drained.len(), reason = %reason, "Rejecting event waiters");
        }

        for (_, wait) in drained {
            let _ = wait
                .tx
                .send(Err(Error::target_closed(reason, "session")));
        }
    }

    /// Returns the number of registered waiters.
    #[inline]
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(method: &str, session: Option<&str>) -> Event {
        let mut frame = json!({ "method": method, "params": {} });
        if let Some(session) = session {
            frame["sessionId"] = json!(session);
        }
        serde_json::from_value(frame).expect("event")
    }

    #[tokio::test]
    async fn test_command_complete_resolves_once() {
        let waiters = CommandWaiters::new();
        let (tx, rx) = oneshot::channel();
        waiters.insert(CommandId::new(1), None, "Browser.getVersion", tx);
        assert_eq!(waiters.len(), 1);

        assert!(waiters.complete(CommandId::new(1), Ok(json!({"product": "x"}))));
        assert_eq!(waiters.len(), 0);

        // A second resolution attempt finds nothing to resolve.
        assert!(!waiters.complete(CommandId::new(1), Ok(Value::Null)));

        let value = rx.await.expect("resolved").expect("success");
        assert_eq!(value["product"], "x");
    }

    #[tokio::test]
    async fn test_reject_all_tags_reason() {
        let waiters = CommandWaiters::new();
        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();
        waiters.insert(CommandId::new(1), None, "Network.waitRequest", tx_a);
        waiters.insert(CommandId::new(2), None, "Network.waitResponse", tx_b);

        waiters.reject_all(CloseReason::TransportClosed);
        assert_eq!(waiters.len(), 0);

        for rx in [rx_a, rx_b] {
            let err = rx.await.expect("resolved").expect_err("rejected");
            assert_eq!(err.close_reason(), Some(CloseReason::TransportClosed));
            assert!(err.to_string().contains("Target closed"));
            assert!(!err.to_string().contains("Timeout"));
        }
    }

    #[tokio::test]
    async fn test_reject_session_leaves_other_waiters() {
        let waiters = CommandWaiters::new();
        let session = SessionId::new("sess-1");
        let (tx_scoped, rx_scoped) = oneshot::channel();
        let (tx_root, mut rx_root) = oneshot::channel();
        waiters.insert(CommandId::new(1), Some(session.clone()), "Page.enable", tx_scoped);
        waiters.insert(CommandId::new(2), None, "Target.getTargets", tx_root);

        waiters.reject_session(&session, CloseReason::TargetDetached);

        let err = rx_scoped.await.expect("resolved").expect_err("rejected");
        assert_eq!(err.close_reason(), Some(CloseReason::TargetDetached));

        assert_eq!(waiters.len(), 1);
        assert!(rx_root.try_recv().is_err(), "root waiter must stay pending");
    }

    #[tokio::test]
    async fn test_sweep_and_completion_never_double_fire() {
        let waiters = std::sync::Arc::new(CommandWaiters::new());
        let (tx, rx) = oneshot::channel();
        waiters.insert(CommandId::new(7), None, "Page.navigate", tx);

        let sweep = {
            let waiters = std::sync::Arc::clone(&waiters);
            std::thread::spawn(move || waiters.reject_all(CloseReason::ExplicitClose))
        };
        let resolve = {
            let waiters = std::sync::Arc::clone(&waiters);
            std::thread::spawn(move || waiters.complete(CommandId::new(7), Ok(Value::Null)))
        };
        sweep.join().expect("sweep");
        let _ = resolve.join().expect("resolve");

        // Whichever side won, exactly one terminal resolution arrives.
        let _outcome = rx.await.expect("exactly one resolution");
        assert_eq!(waiters.len(), 0);
    }

    #[tokio::test]
    async fn test_event_dispatch_matches_and_removes() {
        let waiters = EventWaiters::new();
        let (tx, rx) = oneshot::channel();
        waiters.insert(
            Box::new(|event: &Event| event.method == "Network.responseReceived"),
            tx,
        );

        waiters.dispatch(&event("Network.requestWillBeSent", None));
        assert_eq!(waiters.len(), 1, "non-matching event must not resolve");

        waiters.dispatch(&event("Network.responseReceived", None));
        assert_eq!(waiters.len(), 0);

        let matched = rx.await.expect("resolved").expect("match");
        assert_eq!(matched.method, "Network.responseReceived");
    }

    #[tokio::test]
    async fn test_resolved_waiter_never_reevaluated() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let waiters = EventWaiters::new();
        let calls = std::sync::Arc::new(AtomicUsize::new(0));
        let (tx, _rx) = oneshot::channel();
        let counter = std::sync::Arc::clone(&calls);
        waiters.insert(
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            }),
            tx,
        );

        waiters.dispatch(&event("Page.loadEventFired", None));
        waiters.dispatch(&event("Page.loadEventFired", None));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remove_reports_timeout_race() {
        let waiters = EventWaiters::new();
        let (tx, rx) = oneshot::channel();
        let id = waiters.insert(Box::new(|_| true), tx);

        // Event dispatch wins first; the late removal loses the race.
        waiters.dispatch(&event("Page.loadEventFired", None));
        assert!(!waiters.remove(id));
        assert!(rx.await.expect("resolved").is_ok());
    }

    #[tokio::test]
    async fn test_event_reject_all() {
        let waiters = EventWaiters::new();
        let (tx, rx) = oneshot::channel();
        waiters.insert(Box::new(|_| false), tx);

        waiters.reject_all(CloseReason::ExplicitClose);

        let err = rx.await.expect("resolved").expect_err("rejected");
        assert!(err.is_target_closed());
        assert_eq!(waiters.len(), 0);
    }
}
