//! Queue internals: shared state, the run loop and the single-scan lifecycle.
//!
//! Lock order: the handle list lock is never held while a handle's
//! transition lock is taken or while observers run. Every state transition of
//! a handle, together with its notifications, happens under that handle's
//! transition lock, so observers see each handle's history in order.

use birch_core::{AppResult, BirchError};
use birch_experiment::{CancellationToken, Scan, StepProgress, SweepOutcome};
use chrono::Local;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::handle::ScanHandle;
use crate::log::{LogEntry, LogHistory, LogLevel, QUEUE_LOG_ID};
use crate::notify::Notifier;
use crate::state::{ExecutionMode, QueueState, ScanState};

/// How a worker enters a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Launch {
    /// QUEUED -> RUNNING.
    Fresh,
    /// Continue a handle that `resume` already moved back to RUNNING.
    Resume,
}

pub(crate) struct QueueShared {
    pub(crate) id: String,
    pub(crate) state: watch::Sender<QueueState>,
    pub(crate) mode: Mutex<ExecutionMode>,
    pub(crate) max_parallel: AtomicUsize,
    pub(crate) handles: Mutex<Vec<ScanHandle>>,
    pub(crate) metadata: Mutex<BTreeMap<String, serde_json::Value>>,
    /// Queue-wide stop signal and pause gate.
    pub(crate) token: CancellationToken,
    /// Set by a graceful stop: launch nothing new.
    pub(crate) draining: AtomicBool,
    /// Bounded worker pool of the current PARALLEL run.
    pub(crate) pool: Mutex<Option<Arc<Semaphore>>>,
    pub(crate) logs: Mutex<LogHistory>,
    pub(crate) notifier: Notifier,
}

impl QueueShared {
    pub(crate) fn new(
        id: String,
        mode: ExecutionMode,
        max_parallel: usize,
        log_capacity: usize,
    ) -> Self {
        let (state, _) = watch::channel(QueueState::Idle);
        Self {
            token: CancellationToken::new(id.clone()),
            id,
            state,
            mode: Mutex::new(mode),
            max_parallel: AtomicUsize::new(max_parallel),
            handles: Mutex::new(Vec::new()),
            metadata: Mutex::new(BTreeMap::new()),
            draining: AtomicBool::new(false),
            pool: Mutex::new(None),
            logs: Mutex::new(LogHistory::new(log_capacity)),
            notifier: Notifier::new(),
        }
    }

    pub(crate) fn queue_state(&self) -> QueueState {
        *self.state.borrow()
    }

    pub(crate) fn handles_snapshot(&self) -> Vec<ScanHandle> {
        self.handles.lock().clone()
    }

    pub(crate) fn contains(&self, handle: &ScanHandle) -> bool {
        self.handles.lock().iter().any(|h| h.ptr_eq(handle))
    }

    pub(crate) fn find(&self, scan_id: &str) -> AppResult<ScanHandle> {
        self.handles
            .lock()
            .iter()
            .find(|h| h.id() == scan_id)
            .cloned()
            .ok_or_else(|| BirchError::NotFound(scan_id.to_string()))
    }

    fn stop_requested(&self) -> bool {
        self.token.is_cancelled() || self.draining.load(Ordering::SeqCst)
    }

    // ----- logging ---------------------------------------------------------

    pub(crate) fn log(
        &self,
        scan_id: &str,
        scan_name: &str,
        level: LogLevel,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) {
        let entry = LogEntry {
            timestamp: Local::now(),
            scan_id: scan_id.to_string(),
            scan_name: scan_name.to_string(),
            level,
            message: message.into(),
            data,
        };

        match level {
            LogLevel::Debug => debug!(queue_id = %self.id, scan_id, "{}", entry.message),
            LogLevel::Info => info!(queue_id = %self.id, scan_id, "{}", entry.message),
            LogLevel::Warning => warn!(queue_id = %self.id, scan_id, "{}", entry.message),
            LogLevel::Error => error!(queue_id = %self.id, scan_id, "{}", entry.message),
        }

        self.logs.lock().push(entry.clone());
        self.notifier.log(&entry);
    }

    pub(crate) fn log_queue(&self, level: LogLevel, message: impl Into<String>) {
        self.log(QUEUE_LOG_ID, &self.id, level, message, None);
    }

    pub(crate) fn log_scan(&self, handle: &ScanHandle, level: LogLevel, message: impl Into<String>) {
        self.log(handle.id(), &handle.name(), level, message, None);
    }

    // ----- transitions (caller holds the handle's transition lock) ---------

    pub(crate) fn transition(&self, handle: &ScanHandle, state: ScanState) {
        handle.set_state(state);
        self.notifier.state(handle.id(), state);
    }

    /// Enter a terminal state: end time, progress 1.0, notifications.
    pub(crate) fn finalize(&self, handle: &ScanHandle, state: ScanState) {
        handle.mark_ended();
        handle.set_progress(1.0);
        self.transition(handle, state);
        self.notifier.progress(handle.id(), 1.0);
    }

    // ----- run loop --------------------------------------------------------

    /// Run the selected handles, then return the queue to IDLE.
    pub(crate) async fn run(self: Arc<Self>, handles: Vec<ScanHandle>, mode: ExecutionMode) {
        match mode {
            ExecutionMode::Serial => self.run_serial(&handles).await,
            ExecutionMode::Parallel => self.run_parallel(&handles).await,
        }

        self.draining.store(false, Ordering::SeqCst);
        self.log_queue(LogLevel::Info, "Queue execution finished");
        self.state.send_replace(QueueState::Idle);
    }

    async fn run_serial(self: &Arc<Self>, handles: &[ScanHandle]) {
        for handle in handles {
            if self.stop_requested() {
                break;
            }
            // pause takes effect at the handle boundary
            if !self.token.wait_if_paused().await || self.stop_requested() {
                break;
            }
            if !self.contains(handle) {
                continue;
            }

            self.spawn_run(handle.clone(), Launch::Fresh).await;
            // a paused handle keeps the serial slot until it settles
            self.wait_settled(handle).await;
        }
    }

    async fn run_parallel(self: &Arc<Self>, handles: &[ScanHandle]) {
        let max = self.max_parallel.load(Ordering::SeqCst).max(1);
        let pool = Arc::new(Semaphore::new(max));
        *self.pool.lock() = Some(pool.clone());
        debug!(queue_id = %self.id, max_parallel = max, "Worker pool ready");

        let mut tasks = JoinSet::new();
        for handle in handles {
            if self.stop_requested() {
                break;
            }
            let shared = Arc::clone(self);
            let pool = pool.clone();
            let handle = handle.clone();
            tasks.spawn(async move {
                let Ok(_permit) = pool.acquire_owned().await else {
                    return;
                };
                if !shared.token.wait_if_paused().await
                    || shared.stop_requested()
                    || !shared.contains(&handle)
                {
                    return;
                }
                shared.spawn_run(handle, Launch::Fresh).await;
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(queue_id = %self.id, error = %e, "Scan worker task failed");
            }
        }

        // paused handles re-launch through the same pool
        for handle in handles {
            self.wait_settled(handle).await;
        }
        *self.pool.lock() = None;
    }

    /// Wait until the handle is neither RUNNING nor PAUSED and no worker holds its scan.
    async fn wait_settled(&self, handle: &ScanHandle) {
        handle.wait_for_state(|s| !s.is_active()).await;
        drop(handle.slot().lock().await);
    }

    /// Re-launch a resumed handle from its saved cursor.
    pub(crate) fn relaunch(self: &Arc<Self>, handle: ScanHandle) {
        let shared = Arc::clone(self);
        let pool = self.pool.lock().clone();
        tokio::spawn(async move {
            let _permit = match pool {
                Some(pool) => match pool.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                },
                None => None,
            };
            shared.spawn_run(handle, Launch::Resume).await;
        });
    }

    /// Run one handle on its own task so a panicking instrument fails only that handle.
    async fn spawn_run(self: &Arc<Self>, handle: ScanHandle, launch: Launch) {
        let shared = Arc::clone(self);
        let worker_handle = handle.clone();
        let joined = tokio::spawn(async move {
            shared.run_single(&worker_handle, launch).await;
        })
        .await;

        if let Err(e) = joined {
            self.recover_panicked(&handle, e);
        }
    }

    fn recover_panicked(&self, handle: &ScanHandle, e: JoinError) {
        let _guard = handle.lock_transitions();
        let message = format!("Scan worker panicked: {e}");
        handle.set_error(Some(message.clone()));
        self.log_scan(handle, LogLevel::Error, message);
        if !handle.is_finished() {
            self.finalize(handle, ScanState::Failed);
        }
    }

    // ----- single-scan lifecycle -------------------------------------------

    async fn run_single(self: &Arc<Self>, handle: &ScanHandle, launch: Launch) {
        let mut slot = handle.slot().lock().await;
        let Some(scan) = slot.as_mut() else {
            return;
        };
        if !self.begin_run(handle, launch) {
            return;
        }

        let interrupt = (self.token.clone(), handle.token().clone());
        let result = self.drive(handle, scan, &interrupt).await;
        handle.set_cursor(scan.cursor().clone());
        let shutdown = scan.shutdown().await;

        self.finish_run(handle, result, shutdown);
    }

    async fn drive(
        self: &Arc<Self>,
        handle: &ScanHandle,
        scan: &mut Scan,
        interrupt: &(CancellationToken, CancellationToken),
    ) -> AppResult<SweepOutcome> {
        self.log_scan(handle, LogLevel::Info, "Initializing scan...");
        scan.startup().await?;
        self.log_scan(handle, LogLevel::Info, "Scan initialization complete");

        let shared = Arc::clone(self);
        let stepped = handle.clone();
        let mut on_step = move |step: StepProgress| shared.record_step(&stepped, step);
        scan.execute(interrupt, &mut on_step).await
    }

    fn begin_run(&self, handle: &ScanHandle, launch: Launch) -> bool {
        let _guard = handle.lock_transitions();
        match launch {
            Launch::Fresh => {
                if handle.state() != ScanState::Queued || self.stop_requested() {
                    return false;
                }
                handle.mark_started();
                handle.set_error(None);
                self.transition(handle, ScanState::Running);
                self.log_scan(handle, LogLevel::Info, "Scan started");
            }
            Launch::Resume => {
                if handle.state() != ScanState::Running {
                    return false;
                }
                self.log_scan(handle, LogLevel::Debug, "Scan re-launched from saved cursor");
            }
        }
        true
    }

    fn record_step(&self, handle: &ScanHandle, step: StepProgress) {
        let _guard = handle.lock_transitions();
        if handle.is_finished() {
            return;
        }
        let fraction = step.fraction();
        handle.set_progress(fraction);
        handle.set_cursor(step.cursor);
        self.notifier.progress(handle.id(), fraction);
    }

    fn finish_run(
        &self,
        handle: &ScanHandle,
        result: AppResult<SweepOutcome>,
        shutdown: AppResult<()>,
    ) {
        match shutdown {
            Ok(()) => self.log_scan(handle, LogLevel::Info, "Scan shutdown complete"),
            Err(e) => self.log_scan(
                handle,
                LogLevel::Error,
                format!("Error during shutdown: {e}"),
            ),
        }

        let _guard = handle.lock_transitions();
        let current = handle.state();
        match result {
            Ok(SweepOutcome::Completed) => {
                if current.is_terminal() {
                    return;
                }
                self.log_scan(handle, LogLevel::Info, "Scan completed successfully");
                self.finalize(handle, ScanState::Completed);
            }
            Ok(SweepOutcome::Interrupted) => {
                // PAUSED/ABORTED were already set by the operation that interrupted us
                if current != ScanState::Running {
                    return;
                }
                if self.token.is_cancelled() || handle.token().is_cancelled() {
                    self.log_scan(handle, LogLevel::Warning, "Scan aborted by user");
                    self.finalize(handle, ScanState::Aborted);
                } else if self.token.is_pause_requested() || handle.token().is_pause_requested() {
                    self.transition(handle, ScanState::Paused);
                    self.log_scan(handle, LogLevel::Info, "Scan paused");
                }
                // otherwise a resume arrived after the interrupt was observed and
                // its re-launch continues the sweep
            }
            Err(e) => {
                let trace = match &e {
                    BirchError::ExecutionFailure { source, .. } => format!("{source:?}"),
                    other => format!("{other:?}"),
                };
                handle.set_error(Some(e.to_string()));
                self.log(
                    handle.id(),
                    &handle.name(),
                    LogLevel::Error,
                    format!("Scan failed: {e}"),
                    Some(json!({ "error": e.to_string(), "trace": trace })),
                );
                if !current.is_terminal() {
                    self.finalize(handle, ScanState::Failed);
                }
            }
        }
    }
}
