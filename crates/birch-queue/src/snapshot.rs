//! Serializable queue snapshot.
//!
//! A snapshot holds the queue's structure only: id, execution mode,
//! parallelism bound, metadata and one record per scan. Workers, locks and
//! observer callbacks are not part of it; a restoring caller re-attaches
//! instruments and callbacks.

use birch_core::AppResult;
use birch_experiment::{ScanCursor, ScanDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;

use crate::state::{ExecutionMode, ScanState};

/// One scan in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Scan id.
    pub id: String,
    /// Settings, owner, sample and instrument layout of the scan.
    pub scan: ScanDescriptor,
    /// State when the snapshot was taken.
    pub state: ScanState,
    /// Progress when the snapshot was taken.
    pub progress: f64,
    /// Sweep cursor when the snapshot was taken.
    #[serde(default)]
    pub cursor: ScanCursor,
}

/// Structural snapshot of a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Queue id.
    pub queue_id: String,
    /// Execution mode.
    pub execution_mode: ExecutionMode,
    /// Parallelism bound.
    pub max_parallel_scans: usize,
    /// Free-form queue metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Scans in queue order.
    pub scans: Vec<ScanRecord>,
}

impl QueueSnapshot {
    /// Write the snapshot as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> AppResult<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        info!(queue_id = %self.queue_id, path = %path.display(), scans = self.scans.len(), "Queue snapshot saved");
        Ok(())
    }

    /// Read a snapshot written by [`QueueSnapshot::save`].
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Number of records in `state`.
    pub fn count(&self, state: ScanState) -> usize {
        self.scans.iter().filter(|r| r.state == state).count()
    }
}
