//! Pause/Resume Gate: a process-wide latch that suspends round progression
//! without disconnecting clients.
//!
//! The gate is orthogonal to policy-stop: pause is automatically
//! recoverable by re-querying policy, stop is recoverable only through
//! the manual `/restart` control API endpoint. Built on `tokio::sync::Notify`
//! so `wait_if_paused` suspends the caller rather than busy-polling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tracing::info;

struct Inner {
    paused: AtomicBool,
    reason: RwLock<Option<String>>,
    notify: Notify,
}

/// Cheaply cloneable handle to the gate; all clones share the same latch.
#[derive(Clone)]
pub struct PauseGate {
    inner: Arc<Inner>,
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseGate {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                paused: AtomicBool::new(false),
                reason: RwLock::new(None),
                notify: Notify::new(),
            }),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub async fn pause_reason(&self) -> Option<String> {
        self.inner.reason.read().await.clone()
    }

    /// Idempotent: pausing an already-paused gate just refreshes the reason.
    pub async fn pause(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.inner.paused.store(true, Ordering::SeqCst);
        *self.inner.reason.write().await = Some(reason.clone());
        info!(reason = %reason, "training paused");
    }

    /// Idempotent: resuming an already-running gate is a no-op beyond the
    /// notify wakeup, which is harmless if nobody is waiting.
    pub async fn resume(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.inner.paused.store(false, Ordering::SeqCst);
        *self.inner.reason.write().await = None;
        self.inner.notify.notify_waiters();
        info!(reason = %reason, "training resumed");
    }

    /// Blocks the caller until the gate is no longer paused. Logs a single
    /// line on entry and a single line on exit.
    ///
    /// Registers the `Notified` future and enables it before re-checking
    /// `is_paused()`, per `tokio::sync::Notify`'s documented pattern.
    /// Otherwise a `resume()` landing between the check and the await
    /// would use `notify_waiters()` to wake nobody, and this task would
    /// wait forever for a notification that already happened.
    pub async fn wait_if_paused(&self, context: &str) {
        if !self.is_paused() {
            return;
        }
        info!(context, "strategy engine suspended at pause gate");
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.is_paused() {
                break;
            }
            notified.await;
        }
        info!(context, "strategy engine resumed past pause gate");
    }
}
