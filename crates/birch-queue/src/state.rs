//! Scan, queue and execution-mode enums.

use birch_core::BirchError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a scan handle.
///
/// ```text
/// QUEUED   --start-->      RUNNING
/// RUNNING  --pause-->      PAUSED
/// PAUSED   --resume-->     RUNNING
/// RUNNING  --success-->    COMPLETED
/// RUNNING|PAUSED --abort--> ABORTED
/// RUNNING  --exception-->  FAILED
/// COMPLETED|ABORTED|FAILED --restart--> QUEUED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanState {
    /// Waiting to be launched.
    Queued,
    /// Sweep in progress.
    Running,
    /// Stopped at a step boundary, resumable.
    Paused,
    /// Every point visited.
    Completed,
    /// Stopped by abort.
    Aborted,
    /// An instrument or extension call failed.
    Failed,
}

impl ScanState {
    /// All states in declaration order.
    pub const ALL: [ScanState; 6] = [
        ScanState::Queued,
        ScanState::Running,
        ScanState::Paused,
        ScanState::Completed,
        ScanState::Aborted,
        ScanState::Failed,
    ];

    /// RUNNING or PAUSED.
    pub fn is_active(self) -> bool {
        matches!(self, ScanState::Running | ScanState::Paused)
    }

    /// COMPLETED, ABORTED or FAILED.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ScanState::Completed | ScanState::Aborted | ScanState::Failed
        )
    }

    /// Upper-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            ScanState::Queued => "QUEUED",
            ScanState::Running => "RUNNING",
            ScanState::Paused => "PAUSED",
            ScanState::Completed => "COMPLETED",
            ScanState::Aborted => "ABORTED",
            ScanState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanState {
    type Err = BirchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScanState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| BirchError::InvalidState(format!("unknown scan state '{s}'")))
    }
}

/// State of the queue as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueState {
    /// No run loop.
    Idle,
    /// Run loop active.
    Running,
    /// Run loop waiting on the pause gate.
    Paused,
    /// Aborting or draining; no new scans are launched.
    Stopping,
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QueueState::Idle => "IDLE",
            QueueState::Running => "RUNNING",
            QueueState::Paused => "PAUSED",
            QueueState::Stopping => "STOPPING",
        })
    }
}

/// How selected scans are executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    /// One scan at a time, in queue order.
    #[default]
    #[serde(alias = "serial")]
    Serial,
    /// Up to `max_parallel_scans` scans at once.
    #[serde(alias = "parallel")]
    Parallel,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExecutionMode::Serial => "SERIAL",
            ExecutionMode::Parallel => "PARALLEL",
        })
    }
}

impl FromStr for ExecutionMode {
    type Err = BirchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "serial" => Ok(ExecutionMode::Serial),
            "parallel" => Ok(ExecutionMode::Parallel),
            other => Err(BirchError::Configuration(format!(
                "unknown execution mode '{other}' (expected serial or parallel)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_and_terminal_are_disjoint() {
        for state in ScanState::ALL {
            assert!(!(state.is_active() && state.is_terminal()), "{state}");
        }
        assert!(!ScanState::Queued.is_active());
        assert!(!ScanState::Queued.is_terminal());
    }

    #[test]
    fn test_scan_state_names() {
        assert_eq!(ScanState::Completed.to_string(), "COMPLETED");
        assert_eq!("paused".parse::<ScanState>().unwrap(), ScanState::Paused);
        assert!("done".parse::<ScanState>().is_err());
        assert_eq!(
            serde_json::to_string(&ScanState::Failed).unwrap(),
            "\"FAILED\""
        );
    }

    #[test]
    fn test_execution_mode_parsing() {
        assert_eq!("PARALLEL".parse::<ExecutionMode>().unwrap(), ExecutionMode::Parallel);
        assert_eq!("serial".parse::<ExecutionMode>().unwrap(), ExecutionMode::Serial);
        assert!("batch".parse::<ExecutionMode>().is_err());

        let mode: ExecutionMode = serde_json::from_str("\"parallel\"").unwrap();
        assert_eq!(mode, ExecutionMode::Parallel);
    }
}
