//! Scan queue scheduler for birch.
//!
//! A [`ScanQueue`] holds scans wrapped in [`ScanHandle`]s and runs them in
//! SERIAL or bounded PARALLEL mode. It supports pause, resume and abort at
//! queue and scan level, keeps a bounded log history, notifies observers and
//! saves structural snapshots.
//!
//! - [`queue`]: the public scheduler API
//! - [`handle`]: per-scan scheduling state
//! - [`state`]: scan, queue and execution mode enums
//! - [`log`]: log entries and the bounded history
//! - [`notify`]: observer callback types
//! - [`status`], [`snapshot`]: read-only views and persistence

pub mod handle;
pub mod log;
pub mod notify;
pub mod queue;
mod runner;
pub mod snapshot;
pub mod state;
pub mod status;

pub use handle::ScanHandle;
pub use log::{LogEntry, LogHistory, LogLevel, LogQuery, DEFAULT_LOG_CAPACITY, QUEUE_LOG_ID};
pub use notify::{CallbackId, LogCallback, ProgressCallback, StateCallback};
pub use queue::{QueueOptions, ScanQueue, StartOutcome, DEFAULT_MAX_PARALLEL_SCANS};
pub use snapshot::{QueueSnapshot, ScanRecord};
pub use state::{ExecutionMode, QueueState, ScanState};
pub use status::{QueueStatus, ScanSummary};
