//! Cooperative cancellation for running scans.
//!
//! A [`CancellationToken`] carries two independent signals:
//!
//! - **stop**: set once by [`CancellationToken::cancel`], never cleared except by
//!   [`CancellationToken::reset`]
//! - **pause gate**: toggled by [`CancellationToken::pause`] / [`CancellationToken::resume`]
//!
//! The sweep executor never blocks on a token. It polls [`Interrupt::is_interrupted`]
//! between steps and returns at the step boundary when either signal is set.
//! Schedulers that hold execution between scans use
//! [`CancellationToken::wait_if_paused`], which also wakes up on cancellation.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Checked by the sweep executor before every step.
pub trait Interrupt: Send + Sync {
    /// True when the sweep should stop at the next step boundary.
    fn is_interrupted(&self) -> bool;
}

impl<A: Interrupt, B: Interrupt> Interrupt for (A, B) {
    fn is_interrupted(&self) -> bool {
        self.0.is_interrupted() || self.1.is_interrupted()
    }
}

/// Never interrupts. Useful when a scan is run outside a queue.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverInterrupt;

impl Interrupt for NeverInterrupt {
    fn is_interrupted(&self) -> bool {
        false
    }
}

/// Thread-safe stop signal plus pause gate.
///
/// Clones share state.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    name: String,
    cancelled: AtomicBool,
    paused: watch::Sender<bool>,
    reason: Mutex<Option<String>>,
}

impl CancellationToken {
    /// Create an active (not cancelled, not paused) token.
    pub fn new(name: impl Into<String>) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            inner: Arc::new(TokenInner {
                name: name.into(),
                cancelled: AtomicBool::new(false),
                paused,
                reason: Mutex::new(None),
            }),
        }
    }

    /// Token name, for logs.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Request cancellation. Also opens the pause gate so waiters can observe it.
    ///
    /// Returns `false` if the token was already cancelled.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        let mut stored = self.inner.reason.lock();
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        let reason = reason.into();
        info!(token = %self.inner.name, reason = %reason, "Cancellation requested");
        *stored = Some(reason);
        drop(stored);
        self.inner.paused.send_replace(false);
        true
    }

    /// Close the pause gate. Ignored once cancelled.
    ///
    /// Returns `true` if the gate was open before.
    pub fn pause(&self) -> bool {
        if self.is_cancelled() {
            return false;
        }
        let was_paused = self.inner.paused.send_replace(true);
        if !was_paused {
            debug!(token = %self.inner.name, "Pause requested");
        }
        !was_paused
    }

    /// Open the pause gate.
    ///
    /// Returns `true` if the gate was closed before.
    pub fn resume(&self) -> bool {
        let was_paused = self.inner.paused.send_replace(false);
        if was_paused {
            debug!(token = %self.inner.name, "Resume requested");
        }
        was_paused
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Whether the pause gate is closed.
    pub fn is_pause_requested(&self) -> bool {
        *self.inner.paused.borrow()
    }

    /// Reason passed to [`CancellationToken::cancel`].
    pub fn reason(&self) -> Option<String> {
        self.inner.reason.lock().clone()
    }

    /// Wait while the pause gate is closed.
    ///
    /// Returns `true` once the gate opens, `false` if the token is cancelled.
    pub async fn wait_if_paused(&self) -> bool {
        let mut rx = self.inner.paused.subscribe();
        loop {
            if self.is_cancelled() {
                return false;
            }
            if !*rx.borrow_and_update() {
                return true;
            }
            if rx.changed().await.is_err() {
                return !self.is_cancelled();
            }
        }
    }

    /// Clear both signals. Only call when no worker observes the token.
    pub fn reset(&self) {
        let mut reason = self.inner.reason.lock();
        self.inner.cancelled.store(false, Ordering::SeqCst);
        *reason = None;
        drop(reason);
        self.inner.paused.send_replace(false);
        debug!(token = %self.inner.name, "Token reset");
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new("")
    }
}

impl Interrupt for CancellationToken {
    fn is_interrupted(&self) -> bool {
        self.is_cancelled() || self.is_pause_requested()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.is_cancelled() {
            "cancelled"
        } else if self.is_pause_requested() {
            "paused"
        } else {
            "active"
        };
        f.debug_struct("CancellationToken")
            .field("name", &self.inner.name)
            .field("status", &status)
            .finish()
    }
}
