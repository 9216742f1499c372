//! Read-only status snapshot of a queue.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::handle::ScanHandle;
use crate::state::{ExecutionMode, QueueState, ScanState};

/// Per-scan summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Scan id.
    pub id: String,
    /// Scan name.
    pub name: String,
    /// Lifecycle state.
    pub state: ScanState,
    /// Completed fraction.
    pub progress: f64,
    /// Run duration in seconds.
    pub duration: Option<f64>,
    /// Error message of a failed run.
    pub error: Option<String>,
}

impl ScanSummary {
    pub(crate) fn of(handle: &ScanHandle) -> Self {
        Self {
            id: handle.id().to_string(),
            name: handle.name(),
            state: handle.state(),
            progress: handle.progress(),
            duration: handle
                .duration()
                .map(|d| d.num_milliseconds() as f64 / 1000.0),
            error: handle.error(),
        }
    }
}

/// Aggregate queue status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Queue id.
    pub queue_id: String,
    /// Queue state.
    pub state: QueueState,
    /// Execution mode.
    pub execution_mode: ExecutionMode,
    /// Parallelism bound.
    pub max_parallel_scans: usize,
    /// Number of handles.
    pub total_scans: usize,
    /// Handle count per state; every state is present.
    pub scans_by_state: BTreeMap<ScanState, usize>,
    /// Handles in queue order.
    pub scans: Vec<ScanSummary>,
}

impl QueueStatus {
    pub(crate) fn build(
        queue_id: &str,
        state: QueueState,
        execution_mode: ExecutionMode,
        max_parallel_scans: usize,
        handles: &[ScanHandle],
    ) -> Self {
        let scans: Vec<ScanSummary> = handles.iter().map(ScanSummary::of).collect();
        let mut scans_by_state: BTreeMap<ScanState, usize> =
            ScanState::ALL.into_iter().map(|s| (s, 0)).collect();
        for scan in &scans {
            *scans_by_state.entry(scan.state).or_default() += 1;
        }

        Self {
            queue_id: queue_id.to_string(),
            state,
            execution_mode,
            max_parallel_scans,
            total_scans: scans.len(),
            scans_by_state,
            scans,
        }
    }

    /// Number of handles in `state`.
    pub fn count(&self, state: ScanState) -> usize {
        self.scans_by_state.get(&state).copied().unwrap_or(0)
    }
}
