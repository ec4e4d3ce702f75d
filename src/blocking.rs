//! Blocking bridge for synchronous disposal.
//!
//! `dispose()` must not return until an asynchronous close is fully
//! complete, even when the caller sits on a plain thread or on a runtime
//! worker. The bridge keeps the two roles strictly separate: the close
//! future is always spawned on the runtime (an independent execution unit
//! that also drives the receive loop's continuations), and the calling
//! context only blocks on the completion signal. The blocked context never
//! drives the close inline, so the receive loop keeps making progress while
//! the caller waits.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::sync::mpsc;

use tokio::runtime::{Handle, RuntimeFlavor};

// ============================================================================
// block_until_complete
// ============================================================================

/// Spawns `work` on `runtime` and blocks the calling context until it
/// completes.
///
/// From a plain thread the call parks on the completion channel. From a
/// multi-thread runtime worker it downgrades the worker via
/// [`tokio::task::block_in_place`] first, so the rest of the pool keeps
/// driving the spawned work.
///
/// # Panics
///
/// Panics when called from a current-thread runtime worker: there a
/// blocking wait would starve the only thread able to run the close, which
/// is exactly the deadlock this bridge exists to rule out.
pub(crate) fn block_until_complete<F>(runtime: &Handle, work: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let (done_tx, done_rx) = mpsc::sync_channel::<()>(1);

    runtime.spawn(async move {
        work.await;
        let _ = done_tx.send(());
    });

    match Handle::try_current() {
        Ok(current) if matches!(current.runtime_flavor(), RuntimeFlavor::CurrentThread) => {
            panic!(
                "synchronous dispose cannot block a current-thread runtime worker; \
                 use the async close instead"
            );
        }
        Ok(_) => {
            tokio::task::block_in_place(|| {
                let _ = done_rx.recv();
            });
        }
        Err(_) => {
            let _ = done_rx.recv();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
