//! The scan queue scheduler.
//!
//! [`ScanQueue`] owns an ordered list of [`ScanHandle`]s and runs them either
//! one at a time (SERIAL) or on a bounded worker pool (PARALLEL).
//!
//! # Execution model
//!
//! `start` claims the queue (IDLE -> RUNNING) and hands the selected handles
//! to a background run loop; it never waits for a scan. Each handle runs on its
//! own task through startup, sweep and shutdown.
//!
//! Cancellation is cooperative. The queue carries one [`CancellationToken`]
//! (stop signal plus pause gate) and every handle carries its own. The sweep
//! checks both before every step. Pausing stops a scan at a step boundary and
//! keeps its cursor; resuming re-launches it from that cursor.
//!
//! # Example
//!
//! ```rust,ignore
//! let queue = ScanQueue::new("lab_queue");
//! queue.add_state_callback(|scan_id, state| println!("{scan_id}: {state}"));
//!
//! queue.enqueue(raster_scan);
//! queue.enqueue(focus_scan);
//! queue.start(None, Some(ExecutionMode::Parallel)).await?;
//!
//! queue.wait_for_completion(None).await;
//! println!("{}", serde_json::to_string_pretty(&queue.status())?);
//! ```
//!
//! [`CancellationToken`]: birch_experiment::CancellationToken

use birch_core::{AppResult, BirchError};
use birch_experiment::{Scan, ScanCursor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::handle::ScanHandle;
use crate::log::{LogEntry, LogLevel, LogQuery, DEFAULT_LOG_CAPACITY};
use crate::notify::CallbackId;
use crate::runner::QueueShared;
use crate::snapshot::{QueueSnapshot, ScanRecord};
use crate::state::{ExecutionMode, QueueState, ScanState};
use crate::status::QueueStatus;

/// Default parallelism bound.
pub const DEFAULT_MAX_PARALLEL_SCANS: usize = 4;

/// Construction options of a [`ScanQueue`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueOptions {
    /// Queue id (default: "default")
    #[serde(default = "default_queue_id")]
    pub id: String,

    /// Execution mode used when `start` is not given one (default: serial)
    #[serde(default)]
    pub execution_mode: ExecutionMode,

    /// Upper bound on concurrently running scans in PARALLEL mode (default: 4)
    #[serde(default = "default_max_parallel_scans")]
    pub max_parallel_scans: usize,

    /// Number of retained log entries (default: 10000)
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
}

fn default_queue_id() -> String {
    "default".to_string()
}

fn default_max_parallel_scans() -> usize {
    DEFAULT_MAX_PARALLEL_SCANS
}

fn default_log_capacity() -> usize {
    DEFAULT_LOG_CAPACITY
}

impl QueueOptions {
    /// Defaults with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Set the execution mode.
    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    /// Set the parallelism bound.
    pub fn with_max_parallel_scans(mut self, max: usize) -> Self {
        self.max_parallel_scans = max;
        self
    }

    /// Set the log history capacity.
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            id: default_queue_id(),
            execution_mode: ExecutionMode::default(),
            max_parallel_scans: default_max_parallel_scans(),
            log_capacity: default_log_capacity(),
        }
    }
}

/// Result of [`ScanQueue::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The run loop was launched with this many handles.
    Started {
        /// Number of selected handles.
        scans: usize,
    },
    /// No QUEUED handle matched the selection; the queue stayed IDLE.
    NothingQueued,
}

/// Scheduler for scans. Clones share the same queue.
#[derive(Clone)]
pub struct ScanQueue {
    shared: Arc<QueueShared>,
}

impl ScanQueue {
    /// Empty SERIAL queue with default options.
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_options(QueueOptions::new(id))
    }

    /// Empty queue built from options. A parallelism bound of zero is raised to one.
    pub fn with_options(options: QueueOptions) -> Self {
        let max_parallel = if options.max_parallel_scans == 0 {
            warn!(queue_id = %options.id, "max_parallel_scans of 0 raised to 1");
            1
        } else {
            options.max_parallel_scans
        };
        info!(
            queue_id = %options.id,
            mode = %options.execution_mode,
            max_parallel,
            "Scan queue created"
        );
        Self {
            shared: Arc::new(QueueShared::new(
                options.id,
                options.execution_mode,
                max_parallel,
                options.log_capacity,
            )),
        }
    }

    /// Queue id.
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Queue state.
    pub fn state(&self) -> QueueState {
        self.shared.queue_state()
    }

    /// Watch queue state transitions.
    pub fn subscribe(&self) -> watch::Receiver<QueueState> {
        self.shared.state.subscribe()
    }

    /// Execution mode used by the next `start` without an explicit mode.
    pub fn execution_mode(&self) -> ExecutionMode {
        *self.shared.mode.lock()
    }

    /// Change the execution mode. Only allowed while IDLE.
    pub fn set_execution_mode(&self, mode: ExecutionMode) -> AppResult<()> {
        self.require_idle("change execution mode")?;
        *self.shared.mode.lock() = mode;
        Ok(())
    }

    /// Parallelism bound.
    pub fn max_parallel_scans(&self) -> usize {
        self.shared.max_parallel.load(Ordering::SeqCst)
    }

    /// Change the parallelism bound. Only allowed while IDLE; zero is rejected.
    pub fn set_max_parallel_scans(&self, max: usize) -> AppResult<()> {
        if max == 0 {
            return Err(BirchError::Configuration(
                "max_parallel_scans must be at least 1".to_string(),
            ));
        }
        self.require_idle("change max_parallel_scans")?;
        self.shared.max_parallel.store(max, Ordering::SeqCst);
        Ok(())
    }

    /// Free-form queue metadata.
    pub fn metadata(&self) -> BTreeMap<String, serde_json::Value> {
        self.shared.metadata.lock().clone()
    }

    /// Set one metadata entry, returning the previous value.
    pub fn set_metadata(
        &self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Option<serde_json::Value> {
        self.shared.metadata.lock().insert(key.into(), value)
    }

    fn require_idle(&self, action: &str) -> AppResult<()> {
        let state = self.state();
        if state != QueueState::Idle {
            return Err(BirchError::InvalidState(format!(
                "Cannot {action} while queue is {state}"
            )));
        }
        Ok(())
    }

    // ==================== Queue Management ====================

    /// Append a scan in QUEUED state.
    pub fn enqueue(&self, scan: Scan) -> ScanHandle {
        let handle = ScanHandle::new(scan);
        self.shared.handles.lock().push(handle.clone());
        self.shared.log_scan(
            &handle,
            LogLevel::Info,
            format!("Scan enqueued: {}", handle.name()),
        );
        handle
    }

    /// Remove the scan at `index` and hand it back. Active scans are rejected.
    ///
    /// A scan that was just aborted is handed back once its worker has shut it down.
    pub async fn dequeue(&self, index: usize) -> AppResult<Scan> {
        let handle = self.handle(index)?;
        Self::require_inactive(&handle, "dequeue")?;

        let mut slot = handle.slot().lock().await;
        Self::require_inactive(&handle, "dequeue")?;
        let scan = {
            let mut handles = self.shared.handles.lock();
            let position = handles
                .iter()
                .position(|h| h.ptr_eq(&handle))
                .ok_or_else(|| BirchError::InvalidState("Scan was already removed".to_string()))?;
            let scan = slot
                .take()
                .ok_or_else(|| BirchError::InvalidState("Scan was already removed".to_string()))?;
            handles.remove(position);
            scan
        };
        drop(slot);

        self.shared.log_scan(
            &handle,
            LogLevel::Info,
            format!("Scan dequeued: {}", scan.name()),
        );
        Ok(scan)
    }

    /// Number of handles.
    pub fn size(&self) -> usize {
        self.shared.handles.lock().len()
    }

    /// True when there are no handles.
    pub fn is_empty(&self) -> bool {
        self.shared.handles.lock().is_empty()
    }

    /// Drop every handle that is not RUNNING or PAUSED.
    pub fn clear(&self) {
        self.shared.handles.lock().retain(ScanHandle::is_active);
        self.shared
            .log_queue(LogLevel::Info, "Queue cleared of inactive scans");
    }

    /// Handle at `index`.
    pub fn handle(&self, index: usize) -> AppResult<ScanHandle> {
        Self::at(&self.shared.handles.lock(), index)
    }

    /// Handle with the given scan id.
    pub fn handle_by_id(&self, scan_id: &str) -> Option<ScanHandle> {
        self.shared.find(scan_id).ok()
    }

    /// All handles in queue order.
    pub fn handles(&self) -> Vec<ScanHandle> {
        self.shared.handles_snapshot()
    }

    /// Handles currently in `state`.
    pub fn handles_by_state(&self, state: ScanState) -> Vec<ScanHandle> {
        self.shared
            .handles
            .lock()
            .iter()
            .filter(|h| h.state() == state)
            .cloned()
            .collect()
    }

    /// Move the handle at `from` to position `to`.
    pub fn move_scan(&self, from: usize, to: usize) -> AppResult<()> {
        let mut handles = self.shared.handles.lock();
        let len = handles.len();
        for index in [from, to] {
            if index >= len {
                return Err(BirchError::IndexOutOfRange { index, len });
            }
        }
        let handle = handles.remove(from);
        handles.insert(to, handle);
        debug!(queue_id = %self.shared.id, from, to, "Scan moved");
        Ok(())
    }

    /// Swap the scan at `index` for `scan`, keeping the handle and its id.
    ///
    /// Rejected while the handle is RUNNING or PAUSED.
    pub async fn replace_scan(&self, index: usize, scan: Scan) -> AppResult<ScanHandle> {
        let handle = self.handle(index)?;
        Self::require_inactive(&handle, "replace")?;

        let mut slot = handle.slot().lock().await;
        Self::require_inactive(&handle, "replace")?;
        handle.set_descriptor(scan.describe());
        handle.set_cursor(scan.cursor().clone());
        *slot = Some(scan);
        drop(slot);

        self.shared.log_scan(
            &handle,
            LogLevel::Info,
            format!("Scan replaced: {}", handle.name()),
        );
        Ok(handle)
    }

    fn require_inactive(handle: &ScanHandle, action: &str) -> AppResult<()> {
        if handle.is_active() {
            return Err(BirchError::InvalidState(format!(
                "Cannot {action} an active scan. Abort it first."
            )));
        }
        Ok(())
    }

    fn at(handles: &[ScanHandle], index: usize) -> AppResult<ScanHandle> {
        handles
            .get(index)
            .cloned()
            .ok_or(BirchError::IndexOutOfRange {
                index,
                len: handles.len(),
            })
    }

    // ==================== Execution Control ====================

    /// Start executing QUEUED scans.
    ///
    /// `indices` selects handles by position (out-of-range and non-QUEUED
    /// entries are skipped); `None` selects every QUEUED handle. `mode`
    /// replaces the queue's execution mode. Returns without waiting for any
    /// scan.
    pub async fn start(
        &self,
        indices: Option<&[usize]>,
        mode: Option<ExecutionMode>,
    ) -> AppResult<StartOutcome> {
        let claimed = self.shared.state.send_if_modified(|state| {
            if *state == QueueState::Idle {
                *state = QueueState::Running;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(BirchError::AlreadyRunning);
        }

        let mode = {
            let mut current = self.shared.mode.lock();
            if let Some(mode) = mode {
                *current = mode;
            }
            *current
        };
        self.shared.token.reset();
        self.shared.draining.store(false, Ordering::SeqCst);

        let selected: Vec<ScanHandle> = {
            let handles = self.shared.handles.lock();
            match indices {
                None => handles
                    .iter()
                    .filter(|h| h.state() == ScanState::Queued)
                    .cloned()
                    .collect(),
                Some(indices) => indices
                    .iter()
                    .filter_map(|&i| handles.get(i))
                    .filter(|h| h.state() == ScanState::Queued)
                    .cloned()
                    .collect(),
            }
        };

        if selected.is_empty() {
            self.shared.state.send_replace(QueueState::Idle);
            self.shared
                .log_queue(LogLevel::Warning, "No queued scans to execute");
            return Ok(StartOutcome::NothingQueued);
        }

        let scans = selected.len();
        self.shared.log_queue(
            LogLevel::Info,
            format!("Starting queue execution ({mode}) with {scans} scans"),
        );
        tokio::spawn(Arc::clone(&self.shared).run(selected, mode));
        Ok(StartOutcome::Started { scans })
    }

    /// Pause the whole queue: RUNNING handles become PAUSED at their next
    /// step boundary and no new handle is launched. No-op unless RUNNING.
    pub fn pause(&self) {
        let paused = self.shared.state.send_if_modified(|state| {
            if *state == QueueState::Running {
                *state = QueueState::Paused;
                true
            } else {
                false
            }
        });
        if !paused {
            debug!(queue_id = %self.shared.id, state = %self.state(), "Queue pause ignored");
            return;
        }

        self.shared.token.pause();
        for handle in self.shared.handles_snapshot() {
            let _guard = handle.lock_transitions();
            if handle.state() == ScanState::Running {
                self.shared.transition(&handle, ScanState::Paused);
            }
        }
        self.shared.log_queue(LogLevel::Info, "Queue paused");
    }

    /// Resume a paused queue: PAUSED handles become RUNNING and are
    /// re-launched from their saved cursor. No-op unless PAUSED.
    pub async fn resume(&self) {
        let resumed = self.shared.state.send_if_modified(|state| {
            if *state == QueueState::Paused {
                *state = QueueState::Running;
                true
            } else {
                false
            }
        });
        if !resumed {
            debug!(queue_id = %self.shared.id, state = %self.state(), "Queue resume ignored");
            return;
        }

        self.shared.token.resume();
        for handle in self.shared.handles_snapshot() {
            if self.resume_handle(&handle) {
                self.shared.relaunch(handle);
            }
        }
        self.shared.log_queue(LogLevel::Info, "Queue resumed");
    }

    /// Abort the whole queue: every active handle becomes ABORTED, waiting
    /// workers are released and nothing new is launched. Idempotent.
    pub fn abort(&self) {
        let running = self.shared.state.send_if_modified(|state| {
            if *state == QueueState::Idle {
                false
            } else {
                *state = QueueState::Stopping;
                true
            }
        });
        if !running {
            debug!(queue_id = %self.shared.id, "Queue abort ignored, queue is idle");
            return;
        }

        let first = self.shared.token.cancel("queue aborted");
        for handle in self.shared.handles_snapshot() {
            self.abort_handle(&handle);
        }
        if first {
            self.shared.log_queue(LogLevel::Warning, "Queue aborted");
        }
    }

    /// Graceful stop: launch nothing new and let active scans finish.
    ///
    /// Stopping a PAUSED queue resumes its paused scans so they can finish.
    pub async fn stop(&self) {
        let mut was_paused = false;
        let stopping = self.shared.state.send_if_modified(|state| match *state {
            QueueState::Running | QueueState::Paused => {
                was_paused = *state == QueueState::Paused;
                *state = QueueState::Stopping;
                true
            }
            _ => false,
        });
        if !stopping {
            debug!(queue_id = %self.shared.id, state = %self.state(), "Queue stop ignored");
            return;
        }
        self.shared.draining.store(true, Ordering::SeqCst);
        self.shared.log_queue(
            LogLevel::Info,
            "Queue stopping (waiting for active scans)",
        );

        if was_paused {
            self.shared.token.resume();
            for handle in self.shared.handles_snapshot() {
                if self.resume_handle(&handle) {
                    self.shared.relaunch(handle);
                }
            }
        }
    }

    /// Wait until the run loop has finished and the queue is IDLE.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn wait_for_completion(&self, timeout: Option<Duration>) -> bool {
        let mut rx = self.shared.state.subscribe();
        let idle = rx.wait_for(|state| *state == QueueState::Idle);
        match timeout {
            None => idle.await.is_ok(),
            Some(limit) => matches!(tokio::time::timeout(limit, idle).await, Ok(Ok(_))),
        }
    }

    // ==================== Scan Control ====================

    /// Pause one RUNNING scan at its next step boundary. No-op in any other state.
    pub fn pause_scan(&self, scan_id: &str) -> AppResult<()> {
        let handle = self.shared.find(scan_id)?;
        let _guard = handle.lock_transitions();
        if handle.state() == ScanState::Running {
            handle.token().pause();
            self.shared.transition(&handle, ScanState::Paused);
            self.shared.log_scan(&handle, LogLevel::Info, "Scan paused");
        }
        Ok(())
    }

    /// Resume one PAUSED scan from its saved cursor. No-op in any other state.
    pub async fn resume_scan(&self, scan_id: &str) -> AppResult<()> {
        let handle = self.shared.find(scan_id)?;
        if self.resume_handle(&handle) {
            self.shared.relaunch(handle);
        }
        Ok(())
    }

    /// Abort one RUNNING or PAUSED scan. No-op in any other state.
    pub fn abort_scan(&self, scan_id: &str) -> AppResult<()> {
        let handle = self.shared.find(scan_id)?;
        self.abort_handle(&handle);
        Ok(())
    }

    /// Reset a scan to QUEUED: cursor, progress, error, timestamps and
    /// instrument initialization flags.
    ///
    /// Rejected while the scan is RUNNING or PAUSED. A scan that was just
    /// aborted is reset once its worker has shut it down.
    pub async fn restart(&self, scan_id: &str) -> AppResult<()> {
        let handle = self.shared.find(scan_id)?;
        Self::require_inactive(&handle, "restart")?;

        let mut slot = handle.slot().lock().await;
        let _guard = handle.lock_transitions();
        Self::require_inactive(&handle, "restart")?;
        let cursor = match slot.as_mut() {
            Some(scan) => {
                scan.reset();
                scan.cursor().clone()
            }
            None => handle.cursor(),
        };

        handle.reset_run_state(cursor);
        self.shared.notifier.state(handle.id(), ScanState::Queued);
        self.shared.notifier.progress(handle.id(), 0.0);
        self.shared
            .log_scan(&handle, LogLevel::Info, "Scan reset and re-queued");
        Ok(())
    }

    fn resume_handle(&self, handle: &ScanHandle) -> bool {
        let _guard = handle.lock_transitions();
        if handle.state() != ScanState::Paused {
            return false;
        }
        handle.token().resume();
        self.shared.transition(handle, ScanState::Running);
        self.shared.log_scan(handle, LogLevel::Info, "Scan resumed");
        true
    }

    fn abort_handle(&self, handle: &ScanHandle) {
        let _guard = handle.lock_transitions();
        if !handle.is_active() {
            return;
        }
        handle.token().cancel("scan aborted");
        self.shared.finalize(handle, ScanState::Aborted);
        self.shared.log_scan(handle, LogLevel::Warning, "Scan aborted");
    }

    // ==================== Status & Logs ====================

    /// Read-only status. Never waits for a running scan.
    pub fn status(&self) -> QueueStatus {
        QueueStatus::build(
            &self.shared.id,
            self.state(),
            self.execution_mode(),
            self.max_parallel_scans(),
            &self.shared.handles_snapshot(),
        )
    }

    /// Retained log entries matching `query`, oldest first.
    pub fn logs(&self, query: &LogQuery) -> Vec<LogEntry> {
        self.shared.logs.lock().query(query)
    }

    /// Drop the retained log history.
    pub fn clear_logs(&self) {
        self.shared.logs.lock().clear();
    }

    /// Observe every log entry.
    pub fn add_log_callback(
        &self,
        callback: impl Fn(&LogEntry) + Send + Sync + 'static,
    ) -> CallbackId {
        self.shared.notifier.add_log(Arc::new(callback))
    }

    /// Stop observing log entries. Returns `false` for an unknown id.
    pub fn remove_log_callback(&self, id: CallbackId) -> bool {
        self.shared.notifier.remove_log(id)
    }

    /// Observe `(scan_id, fraction)` progress updates.
    pub fn add_progress_callback(
        &self,
        callback: impl Fn(&str, f64) + Send + Sync + 'static,
    ) -> CallbackId {
        self.shared.notifier.add_progress(Arc::new(callback))
    }

    /// Stop observing progress. Returns `false` for an unknown id.
    pub fn remove_progress_callback(&self, id: CallbackId) -> bool {
        self.shared.notifier.remove_progress(id)
    }

    /// Observe `(scan_id, state)` transitions.
    pub fn add_state_callback(
        &self,
        callback: impl Fn(&str, ScanState) + Send + Sync + 'static,
    ) -> CallbackId {
        self.shared.notifier.add_state(Arc::new(callback))
    }

    /// Stop observing transitions. Returns `false` for an unknown id.
    pub fn remove_state_callback(&self, id: CallbackId) -> bool {
        self.shared.notifier.remove_state(id)
    }

    // ==================== Persistence ====================

    /// Structural snapshot without workers or callbacks.
    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            queue_id: self.shared.id.clone(),
            execution_mode: self.execution_mode(),
            max_parallel_scans: self.max_parallel_scans(),
            metadata: self.metadata(),
            scans: self
                .shared
                .handles_snapshot()
                .iter()
                .map(|h| ScanRecord {
                    id: h.id().to_string(),
                    scan: h.descriptor(),
                    state: h.state(),
                    progress: h.progress(),
                    cursor: h.cursor(),
                })
                .collect(),
        }
    }

    /// Write [`ScanQueue::snapshot`] to `path` as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> AppResult<()> {
        self.snapshot().save(path)
    }

    /// Read a snapshot written by [`ScanQueue::save`].
    pub fn load_snapshot(path: impl AsRef<Path>) -> AppResult<QueueSnapshot> {
        QueueSnapshot::load(path)
    }

    /// Empty IDLE queue with the snapshot's id, mode, bound and metadata.
    pub fn restore(snapshot: &QueueSnapshot) -> Self {
        let queue = Self::with_options(
            QueueOptions::new(snapshot.queue_id.clone())
                .with_execution_mode(snapshot.execution_mode)
                .with_max_parallel_scans(snapshot.max_parallel_scans),
        );
        *queue.shared.metadata.lock() = snapshot.metadata.clone();
        queue
    }

    /// Restore and re-enqueue every recorded scan.
    ///
    /// `build` re-pairs a record with live instruments. All handles start
    /// QUEUED regardless of their recorded state; a recorded cursor is applied
    /// so each sweep continues where it stopped.
    pub fn restore_with(
        snapshot: &QueueSnapshot,
        mut build: impl FnMut(&ScanRecord) -> AppResult<Scan>,
    ) -> AppResult<Self> {
        let queue = Self::restore(snapshot);
        for record in &snapshot.scans {
            let mut scan = build(record)?;
            if record.cursor != ScanCursor::default() {
                scan.set_cursor(record.cursor.clone())?;
            }
            queue.enqueue(scan);
        }
        info!(
            queue_id = %queue.id(),
            scans = queue.size(),
            "Queue restored from snapshot"
        );
        Ok(queue)
    }
}

impl std::fmt::Debug for ScanQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanQueue")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .field("mode", &self.execution_mode())
            .field("scans", &self.size())
            .finish()
    }
}

impl std::fmt::Display for ScanQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Queue {} ({}, {} scans)",
            self.shared.id,
            self.state(),
            self.size()
        )
    }
}
