//! Close reasons and the single-fire close latch.
//!
//! Every level of the hierarchy (connection, session, page, context,
//! browser) carries one [`CloseSignal`]. The latch collapses concurrent
//! close triggers into a single effective close: the first recorded
//! [`CloseReason`] wins and every later trigger is a no-op. The recorded
//! state is synchronously observable the instant [`CloseSignal::fire`]
//! returns, before any waiter drain runs.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use tokio::sync::watch;

// ============================================================================
// CloseReason
// ============================================================================

/// Why a connection, session, or hierarchy node closed.
///
/// Carried in every closed-target rejection so callers can distinguish an
/// intentional close from a connection fault. A timeout is never expressed
/// as a close reason; it is a separate error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The client requested the close.
    ExplicitClose,
    /// The remote end detached the target.
    TargetDetached,
    /// The transport closed cleanly without an explicit close request.
    TransportClosed,
    /// The transport failed with an error.
    TransportError,
}

impl CloseReason {
    /// Returns a short human-readable cause.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExplicitClose => "closed by client",
            Self::TargetDetached => "target detached",
            Self::TransportClosed => "transport closed",
            Self::TransportError => "transport error",
        }
    }

    /// Returns `true` if the close originated in a transport fault.
    #[inline]
    #[must_use]
    pub const fn is_transport_fault(self) -> bool {
        matches!(self, Self::TransportClosed | Self::TransportError)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// CloseSignal
// ============================================================================

/// Single-fire latch recording why a node closed.
///
/// State transitions are monotonic: once a reason is recorded it never
/// changes and never reverts to open. Subscribers observe the transition
/// exactly once via [`CloseSignal::wait`].
#[derive(Debug)]
pub(crate) struct CloseSignal {
    tx: watch::Sender<Option<CloseReason>>,
}

impl CloseSignal {
    /// Creates an open (unfired) signal.
    #[must_use]
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Records `reason` if no reason is recorded yet.
    ///
    /// Returns `true` if this call won the race and the caller must drive
    /// the close work; `false` if the node was already closing/closed.
    pub(crate) fn fire(&self, reason: CloseReason) -> bool {
        self.tx.send_if_modified(|state| {
            if state.is_some() {
                false
            } else {
                *state = Some(reason);
                true
            }
        })
    }

    /// Returns the recorded reason, or `None` while open.
    #[inline]
    #[must_use]
    pub(crate) fn get(&self) -> Option<CloseReason> {
        *self.tx.borrow()
    }

    /// Returns `true` once a reason has been recorded.
    #[inline]
    #[must_use]
    pub(crate) fn is_fired(&self) -> bool {
        self.get().is_some()
    }

    /// Returns a receiver observing the latch.
    #[must_use]
    pub(crate) fn subscribe(&self) -> watch::Receiver<Option<CloseReason>> {
        self.tx.subscribe()
    }

    /// Waits until a reason is recorded and returns it.
    ///
    /// Completes immediately if the latch already fired.
    pub(crate) async fn wait(&self) -> CloseReason {
        let mut rx = self.subscribe();
        // wait_for cannot fail: `self` keeps the sender alive for the borrow.
        let state = rx
            .wait_for(Option::is_some)
            .await
            .map(|guard| *guard)
            .unwrap_or(Some(CloseReason::TransportClosed));
        state.unwrap_or(CloseReason::TransportClosed)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_display() {
        assert_eq!(CloseReason::ExplicitClose.to_string(), "closed by client");
        assert_eq!(CloseReason::TargetDetached.to_string(), "target detached");
        assert!(CloseReason::TransportError.is_transport_fault());
        assert!(!CloseReason::ExplicitClose.is_transport_fault());
    }

    #[test]
    fn test_first_fire_wins() {
        let signal = CloseSignal::new();
        assert!(!signal.is_fired());

        assert!(signal.fire(CloseReason::TransportClosed));
        assert!(!signal.fire(CloseReason::ExplicitClose));

        assert_eq!(signal.get(), Some(CloseReason::TransportClosed));
    }

    #[test]
    fn test_concurrent_fire_single_reason() {
        use std::sync::Arc;

        let signal = Arc::new(CloseSignal::new());
        let mut handles = Vec::new();

        for i in 0..8 {
            let signal = Arc::clone(&signal);
            handles.push(std::thread::spawn(move || {
                let reason = if i % 2 == 0 {
                    CloseReason::ExplicitClose
                } else {
                    CloseReason::TransportError
                };
                signal.fire(reason)
            }));
        }

        let wins: usize = handles
            .into_iter()
            .map(|h| usize::from(h.join().expect("thread")))
            .sum();

        assert_eq!(wins, 1, "exactly one trigger may win the latch");
        assert!(signal.is_fired());
    }

    #[tokio::test]
    async fn test_wait_observes_fire() {
        let signal = CloseSignal::new();
        let mut rx = signal.subscribe();

        let waiter = tokio::spawn(async move {
            rx.wait_for(Option::is_some).await.map(|guard| *guard).ok()
        });

        signal.fire(CloseReason::TargetDetached);
        let observed = waiter.await.expect("join").flatten();
        assert_eq!(observed, Some(CloseReason::TargetDetached));
    }

    #[tokio::test]
    async fn test_wait_after_fire_completes_immediately() {
        let signal = CloseSignal::new();
        signal.fire(CloseReason::ExplicitClose);
        assert_eq!(signal.wait().await, CloseReason::ExplicitClose);
    }
}
