//! Error types shared by every birch crate.
//!
//! `BirchError` is the single error type returned by the scheduler and the
//! work-unit machinery. Instrument drivers and scan extensions report failures
//! through `anyhow::Result`; those are wrapped into
//! [`BirchError::ExecutionFailure`] together with the [`ExecutionPhase`] in which
//! they occurred.
//!
//! ## Error Categories
//!
//! 1. **Structural errors** - `InvalidState`, `IndexOutOfRange`, `NotFound`,
//!    `AlreadyRunning`, `InvalidAxis`
//!    - Returned synchronously by queue and scan operations
//!    - Nothing has been mutated when one of these is returned
//!
//! 2. **Execution errors** - `ExecutionFailure`
//!    - Raised by an instrument or extension while a scan is running
//!    - Isolated to the scan that produced them; the queue keeps going
//!
//! 3. **Persistence / configuration errors** - `Io`, `Serialization`, `Configuration`

use thiserror::Error;

/// Convenience alias for results using the birch error type.
pub type AppResult<T> = std::result::Result<T, BirchError>;

/// Lifecycle phase of a scan in which an instrument call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionPhase {
    /// Connecting, initializing and configuring instruments.
    Startup,
    /// Walking the movement grid and taking measurements.
    Sweep,
    /// Releasing instruments after the sweep.
    Shutdown,
}

impl std::fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ExecutionPhase::Startup => "startup",
            ExecutionPhase::Sweep => "sweep",
            ExecutionPhase::Shutdown => "shutdown",
        };
        write!(f, "{}", label)
    }
}

/// Primary error type for birch.
#[derive(Error, Debug)]
pub enum BirchError {
    /// Operation attempted against a scan or queue in an incompatible state.
    ///
    /// Examples: dequeuing a running scan, restarting a paused scan, changing
    /// the execution mode while the queue is running.
    ///
    /// **Recovery Strategy**: abort the scan (or wait for the queue to go idle)
    /// and retry.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A queue index does not address an existing scan.
    #[error("Index {index} out of range for queue of length {len}")]
    IndexOutOfRange {
        /// Index that was requested.
        index: usize,
        /// Queue length at the time of the request.
        len: usize,
    },

    /// No scan with the given identifier exists in the queue.
    #[error("No scan found with ID: {0}")]
    NotFound(String),

    /// `start()` was called while the queue already had a run in progress.
    #[error("Queue is already running")]
    AlreadyRunning,

    /// A movement axis was declared with an unusable position list.
    ///
    /// An axis with zero positions would make the sweep odometer divide by
    /// zero, so it is rejected when the axis is built.
    #[error("Invalid movement axis: {0}")]
    InvalidAxis(String),

    /// An instrument or extension call failed while a scan was executing.
    ///
    /// **Error Type**: Isolated per scan. The scan transitions to FAILED and
    /// the scheduler continues with the remaining scans.
    #[error("Execution failed during {phase}: {source:#}")]
    ExecutionFailure {
        /// Phase in which the failure happened.
        phase: ExecutionPhase,
        /// Underlying driver or extension error.
        #[source]
        source: anyhow::Error,
    },

    /// Reading or writing a queue snapshot failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A queue snapshot could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration parsed correctly but failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl BirchError {
    /// Wrap a driver error raised during `phase`.
    pub fn execution(phase: ExecutionPhase, source: anyhow::Error) -> Self {
        Self::ExecutionFailure { phase, source }
    }

    /// Phase of an execution failure, if this is one.
    pub fn phase(&self) -> Option<ExecutionPhase> {
        match self {
            Self::ExecutionFailure { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Whether the error was produced by a running scan rather than by a
    /// structural operation.
    pub fn is_execution_failure(&self) -> bool {
        matches!(self, Self::ExecutionFailure { .. })
    }
}
