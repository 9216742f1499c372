//! Scheduler-owned wrapper around a scan.
//!
//! A [`ScanHandle`] is cheap to clone; clones refer to the same scan. Its id
//! is fixed when the scan is enqueued and survives `replace_scan`, so
//! observers keyed by scan id stay valid.
//!
//! The scan itself sits in an async mutex that the running worker holds for
//! the whole startup/sweep/shutdown cycle. Scheduling fields (state, progress,
//! timestamps, error) live outside that lock and can be read at any time
//! without waiting for the worker.

use birch_experiment::{CancellationToken, Scan, ScanCursor, ScanDescriptor};
use chrono::{DateTime, Local};
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard, RwLock};
use std::sync::Arc;
use tokio::sync::watch;

use crate::state::ScanState;

/// Handle to one enqueued scan.
#[derive(Clone)]
pub struct ScanHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    id: String,
    scan: tokio::sync::Mutex<Option<Scan>>,
    descriptor: RwLock<ScanDescriptor>,
    state: watch::Sender<ScanState>,
    progress: Mutex<f64>,
    // last committed cursor, readable while a worker holds the scan
    cursor: Mutex<ScanCursor>,
    times: Mutex<RunTimes>,
    error: Mutex<Option<String>>,
    token: CancellationToken,
    // Serializes transitions and their notifications. Reentrant so an
    // observer may act on the handle that notified it.
    transitions: ReentrantMutex<()>,
}

#[derive(Default)]
struct RunTimes {
    start: Option<DateTime<Local>>,
    end: Option<DateTime<Local>>,
}

impl ScanHandle {
    pub(crate) fn new(scan: Scan) -> Self {
        let id = scan.id();
        let (state, _) = watch::channel(ScanState::Queued);
        Self {
            inner: Arc::new(HandleInner {
                token: CancellationToken::new(id.clone()),
                descriptor: RwLock::new(scan.describe()),
                progress: Mutex::new(scan.progress().clamp(0.0, 1.0)),
                cursor: Mutex::new(scan.cursor().clone()),
                scan: tokio::sync::Mutex::new(Some(scan)),
                id,
                state,
                times: Mutex::new(RunTimes::default()),
                error: Mutex::new(None),
                transitions: ReentrantMutex::new(()),
            }),
        }
    }

    /// Scan id, fixed at enqueue time.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Name of the current scan.
    pub fn name(&self) -> String {
        self.inner.descriptor.read().settings.scan_name.clone()
    }

    /// Lifecycle state.
    pub fn state(&self) -> ScanState {
        *self.inner.state.borrow()
    }

    /// Completed fraction in [0, 1].
    pub fn progress(&self) -> f64 {
        *self.inner.progress.lock()
    }

    /// Sweep cursor as of the last committed step.
    pub fn cursor(&self) -> ScanCursor {
        self.inner.cursor.lock().clone()
    }

    /// When the current run started.
    pub fn start_time(&self) -> Option<DateTime<Local>> {
        self.inner.times.lock().start
    }

    /// When the current run ended.
    pub fn end_time(&self) -> Option<DateTime<Local>> {
        self.inner.times.lock().end
    }

    /// End (or now, while running) minus start.
    pub fn duration(&self) -> Option<chrono::Duration> {
        let times = self.inner.times.lock();
        let start = times.start?;
        Some(times.end.unwrap_or_else(Local::now) - start)
    }

    /// Error message of a failed run.
    pub fn error(&self) -> Option<String> {
        self.inner.error.lock().clone()
    }

    /// RUNNING or PAUSED.
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// COMPLETED, ABORTED or FAILED.
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Serializable summary of the current scan.
    pub fn descriptor(&self) -> ScanDescriptor {
        self.inner.descriptor.read().clone()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ScanState> {
        self.inner.state.subscribe()
    }

    /// Wait until the state satisfies `predicate`.
    pub async fn wait_for_state(&self, predicate: impl Fn(ScanState) -> bool) -> ScanState {
        let mut rx = self.inner.state.subscribe();
        let state = match rx.wait_for(|state| predicate(*state)).await {
            Ok(state) => *state,
            // the sender lives in `self`, so the channel cannot close here
            Err(_) => self.state(),
        };
        state
    }

    /// Run `f` on the scan, waiting for a running worker to release it.
    ///
    /// Returns `None` once the scan was dequeued.
    pub async fn with_scan<R>(&self, f: impl FnOnce(&Scan) -> R) -> Option<R> {
        let slot = self.inner.scan.lock().await;
        slot.as_ref().map(f)
    }

    pub(crate) fn ptr_eq(&self, other: &ScanHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn slot(&self) -> &tokio::sync::Mutex<Option<Scan>> {
        &self.inner.scan
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    pub(crate) fn lock_transitions(&self) -> ReentrantMutexGuard<'_, ()> {
        self.inner.transitions.lock()
    }

    pub(crate) fn set_state(&self, state: ScanState) {
        self.inner.state.send_replace(state);
    }

    pub(crate) fn set_progress(&self, progress: f64) {
        *self.inner.progress.lock() = progress.clamp(0.0, 1.0);
    }

    pub(crate) fn set_cursor(&self, cursor: ScanCursor) {
        *self.inner.cursor.lock() = cursor;
    }

    pub(crate) fn set_error(&self, error: Option<String>) {
        *self.inner.error.lock() = error;
    }

    pub(crate) fn set_descriptor(&self, descriptor: ScanDescriptor) {
        *self.inner.descriptor.write() = descriptor;
    }

    pub(crate) fn mark_started(&self) {
        let mut times = self.inner.times.lock();
        times.start = Some(Local::now());
        times.end = None;
    }

    pub(crate) fn mark_ended(&self) {
        self.inner.times.lock().end = Some(Local::now());
    }

    /// Back to a fresh QUEUED handle at `cursor`. The caller notifies.
    pub(crate) fn reset_run_state(&self, cursor: ScanCursor) {
        *self.inner.times.lock() = RunTimes::default();
        self.set_error(None);
        self.set_progress(0.0);
        self.set_cursor(cursor);
        self.inner.token.reset();
        self.set_state(ScanState::Queued);
    }
}

impl std::fmt::Debug for ScanHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanHandle")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("progress", &self.progress())
            .finish()
    }
}
