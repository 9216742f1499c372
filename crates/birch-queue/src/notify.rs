//! Observer registries for log, progress and state-change events.
//!
//! Callbacks run synchronously on the thread that produced the event. A
//! panicking callback is caught and reported through `tracing`; it never
//! reaches the scheduler or the other observers.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::log::LogEntry;
use crate::state::ScanState;

/// Receives every log entry.
pub type LogCallback = dyn Fn(&LogEntry) + Send + Sync;
/// Receives `(scan_id, fraction)` progress updates.
pub type ProgressCallback = dyn Fn(&str, f64) + Send + Sync;
/// Receives `(scan_id, new_state)` transitions.
pub type StateCallback = dyn Fn(&str, ScanState) + Send + Sync;

/// Identifies a registered callback for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallbackId(u64);

struct Registry<F: ?Sized> {
    kind: &'static str,
    entries: RwLock<Vec<(CallbackId, Arc<F>)>>,
}

impl<F: ?Sized> Registry<F> {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: RwLock::new(Vec::new()),
        }
    }

    fn add(&self, id: CallbackId, callback: Arc<F>) {
        self.entries.write().push((id, callback));
    }

    fn remove(&self, id: CallbackId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    /// Invoke every callback on a snapshot of the list, so callbacks may
    /// register or remove observers.
    fn each(&self, invoke: impl Fn(&F)) {
        let callbacks: Vec<Arc<F>> = self.entries.read().iter().map(|(_, f)| f.clone()).collect();
        for callback in callbacks {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| invoke(&callback))) {
                warn!(
                    registry = self.kind,
                    panic = %panic_message(payload.as_ref()),
                    "Observer callback panicked"
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// The three observer lists owned by one queue.
pub(crate) struct Notifier {
    next_id: AtomicU64,
    log: Registry<LogCallback>,
    progress: Registry<ProgressCallback>,
    state: Registry<StateCallback>,
}

impl Notifier {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            log: Registry::new("log"),
            progress: Registry::new("progress"),
            state: Registry::new("state"),
        }
    }

    fn next_id(&self) -> CallbackId {
        CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn add_log(&self, callback: Arc<LogCallback>) -> CallbackId {
        let id = self.next_id();
        self.log.add(id, callback);
        id
    }

    pub(crate) fn add_progress(&self, callback: Arc<ProgressCallback>) -> CallbackId {
        let id = self.next_id();
        self.progress.add(id, callback);
        id
    }

    pub(crate) fn add_state(&self, callback: Arc<StateCallback>) -> CallbackId {
        let id = self.next_id();
        self.state.add(id, callback);
        id
    }

    pub(crate) fn remove_log(&self, id: CallbackId) -> bool {
        self.log.remove(id)
    }

    pub(crate) fn remove_progress(&self, id: CallbackId) -> bool {
        self.progress.remove(id)
    }

    pub(crate) fn remove_state(&self, id: CallbackId) -> bool {
        self.state.remove(id)
    }

    pub(crate) fn log(&self, entry: &LogEntry) {
        self.log.each(|cb| cb(entry));
    }

    pub(crate) fn progress(&self, scan_id: &str, fraction: f64) {
        self.progress.each(|cb| cb(scan_id, fraction));
    }

    pub(crate) fn state(&self, scan_id: &str, state: ScanState) {
        self.state.each(|cb| cb(scan_id, state));
    }
}
