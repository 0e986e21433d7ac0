//! Timer Wheel
//!
//! Shared one-shot scheduler for deferred callbacks: cache TTL eviction,
//! circuit-state transitions and health-probe rescheduling. Built on the
//! tokio timer; each scheduled callback is an aborted-on-cancel task, so
//! scheduling from inside a firing callback is always safe.
//!
//! Callbacks must be idempotent: a timer may fire after the entity it
//! targets has been removed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;

/// Handle to a scheduled callback.
#[derive(Debug)]
pub struct Timeout {
    handle: AbortHandle,
}

impl Timeout {
    /// Cancel the callback if it has not fired yet.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

/// One-shot callback scheduler.
#[derive(Debug, Default)]
pub struct TimerWheel {
    pending: Arc<AtomicUsize>,
}

struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

impl TimerWheel {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Run `callback` once after `delay`. The returned handle cancels it;
    /// dropping the handle leaves the timer armed.
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> Timeout
    where
        F: FnOnce() + Send + 'static,
    {
        self.pending.fetch_add(1, Ordering::Relaxed);
        let guard = PendingGuard(self.pending.clone());

        let task = tokio::spawn(async move {
            let _guard = guard;
            tokio::time::sleep(delay).await;
            callback();
        });

        Timeout {
            handle: task.abort_handle(),
        }
    }

    /// Number of timers armed and not yet fired or cancelled.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }
}
