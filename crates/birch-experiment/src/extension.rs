//! Scan extensions: observers invoked at fixed points of a scan's lifecycle.
//!
//! Every hook has an empty default, so an extension only implements the
//! points it cares about. Hook errors propagate like instrument errors and
//! fail the scan.

use anyhow::Result;
use async_trait::async_trait;
use birch_core::DataTable;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::scan::ScanSettings;

/// One axis move issued by the sweep executor.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisMove {
    /// Index of the axis within the scan.
    pub axis: usize,
    /// Name of the movement instrument.
    pub instrument: String,
    /// Target position.
    pub position: f64,
}

/// Lifecycle observer attached to a scan.
#[async_trait]
pub trait ScanExtension: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        "extension"
    }

    /// Scan startup, before instruments are connected.
    async fn startup(&self, _settings: &ScanSettings) -> Result<()> {
        Ok(())
    }

    /// Before the changed axes are moved.
    async fn move_to_positions(&self, _moves: &[AxisMove]) -> Result<()> {
        Ok(())
    }

    /// Before the measurements of one sweep step.
    async fn take_measurements(&self) -> Result<()> {
        Ok(())
    }

    /// Once, when the sweep begins (again after every resume).
    async fn execute(&self) -> Result<()> {
        Ok(())
    }

    /// For every measurement table, positions already appended.
    async fn save_data(&self, _data: &DataTable, _measurement_name: &str) -> Result<()> {
        Ok(())
    }

    /// Scan shutdown, before instruments are released.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// A table captured by [`TableRecorder`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedTable {
    /// Measurement instrument that produced the table.
    pub measurement: String,
    /// The table, including position columns.
    pub table: DataTable,
}

/// Keeps every saved table in memory.
///
/// Clones share the same storage, so a caller can keep one clone and attach
/// another to a scan.
#[derive(Debug, Clone, Default)]
pub struct TableRecorder {
    tables: Arc<Mutex<Vec<RecordedTable>>>,
}

impl TableRecorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded tables in save order.
    pub fn tables(&self) -> Vec<RecordedTable> {
        self.tables.lock().clone()
    }

    /// Tables produced by one measurement instrument.
    pub fn tables_for(&self, measurement: &str) -> Vec<DataTable> {
        self.tables
            .lock()
            .iter()
            .filter(|t| t.measurement == measurement)
            .map(|t| t.table.clone())
            .collect()
    }

    /// Number of recorded tables.
    pub fn len(&self) -> usize {
        self.tables.lock().len()
    }

    /// True when nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.tables.lock().is_empty()
    }

    /// Drop all recorded tables.
    pub fn clear(&self) {
        self.tables.lock().clear();
    }
}

#[async_trait]
impl ScanExtension for TableRecorder {
    fn name(&self) -> &str {
        "table_recorder"
    }

    async fn save_data(&self, data: &DataTable, measurement_name: &str) -> Result<()> {
        self.tables.lock().push(RecordedTable {
            measurement: measurement_name.to_string(),
            table: data.clone(),
        });
        Ok(())
    }
}
