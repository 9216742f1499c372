//! Mock measurement instrument.

use anyhow::Result;
use async_trait::async_trait;
use birch_core::{ColumnSpec, DataTable, Measurement, SettingsMap};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::{sleep, Duration};

use crate::faults::{Fault, FaultPlan};

/// Configuration for [`MockMeter`], read from an instrument's `config` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MockMeterConfig {
    /// Columns produced by every measurement (default: voltage in V, current in A)
    #[serde(default = "default_columns")]
    pub columns: Vec<ColumnSpec>,

    /// Rows per measurement (default: 1)
    #[serde(default = "default_rows")]
    pub rows: usize,

    /// Acquisition time in milliseconds (default: 0)
    #[serde(default)]
    pub delay_ms: u64,
}

fn default_columns() -> Vec<ColumnSpec> {
    vec![ColumnSpec::new("voltage", "V"), ColumnSpec::new("current", "A")]
}

fn default_rows() -> usize {
    1
}

impl Default for MockMeterConfig {
    fn default() -> Self {
        Self {
            columns: default_columns(),
            rows: default_rows(),
            delay_ms: 0,
        }
    }
}

/// Simulated meter producing deterministic readings.
///
/// The value in row `r`, column `c` of the `n`-th measurement (1-based) is
/// `n + r * 0.1 + c * 0.01`, so tests can tell measurements apart.
pub struct MockMeter {
    name: String,
    columns: Vec<ColumnSpec>,
    rows: usize,
    delay: Duration,
    settings: Mutex<SettingsMap>,
    measurements: AtomicUsize,
    connects: AtomicUsize,
    initializes: AtomicUsize,
    shutdowns: AtomicUsize,
    faults: FaultPlan,
}

impl MockMeter {
    /// Instant meter with the default voltage/current columns.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, MockMeterConfig::default())
    }

    /// Meter built from configuration.
    pub fn with_config(name: impl Into<String>, config: MockMeterConfig) -> Self {
        Self {
            name: name.into(),
            columns: config.columns,
            rows: config.rows,
            delay: Duration::from_millis(config.delay_ms),
            settings: Mutex::new(SettingsMap::new()),
            measurements: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            initializes: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
            faults: FaultPlan::none(),
        }
    }

    /// Replace the produced columns.
    pub fn with_columns(mut self, columns: Vec<ColumnSpec>) -> Self {
        self.columns = columns;
        self
    }

    /// Rows per measurement.
    pub fn with_rows(mut self, rows: usize) -> Self {
        self.rows = rows;
        self
    }

    /// Sleep this long in every measurement.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the N-th measurement (1-based).
    pub fn fail_on_call(mut self, call: u32) -> Self {
        self.faults = self.faults.add(Fault::OnCall {
            operation: "measure",
            call,
        });
        self
    }

    /// Fail every shutdown.
    pub fn with_shutdown_failure(mut self) -> Self {
        self.faults = self.faults.add(Fault::Always {
            operation: "shutdown",
        });
        self
    }

    /// Number of successful measurements.
    pub fn measurement_count(&self) -> usize {
        self.measurements.load(Ordering::SeqCst)
    }

    /// Number of measurement attempts, failed ones included.
    pub fn call_count(&self) -> u32 {
        self.faults.calls("measure")
    }

    /// Settings received through `apply_settings`.
    pub fn applied_settings(&self) -> SettingsMap {
        self.settings.lock().clone()
    }

    /// Number of `connect` calls.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of `initialize` calls.
    pub fn initialize_count(&self) -> usize {
        self.initializes.load(Ordering::SeqCst)
    }

    /// Number of `shutdown` calls.
    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Measurement for MockMeter {
    fn name(&self) -> &str {
        &self.name
    }

    fn columns(&self) -> Vec<ColumnSpec> {
        self.columns.clone()
    }

    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.faults.check(&self.name, "connect")
    }

    async fn initialize(&self) -> Result<()> {
        self.initializes.fetch_add(1, Ordering::SeqCst);
        self.faults.check(&self.name, "initialize")
    }

    async fn apply_settings(&self, settings: &SettingsMap) -> Result<()> {
        self.settings.lock().extend(settings.clone());
        Ok(())
    }

    async fn settings(&self) -> Result<SettingsMap> {
        Ok(self.settings.lock().clone())
    }

    async fn perform_measurement(&self) -> Result<DataTable> {
        self.faults.check(&self.name, "measure")?;

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let n = self.measurements.fetch_add(1, Ordering::SeqCst) + 1;
        let mut table = DataTable::from_specs(&self.columns);
        for r in 0..self.rows {
            let row = (0..self.columns.len())
                .map(|c| n as f64 + r as f64 * 0.1 + c as f64 * 0.01)
                .collect();
            table.push_row(row)?;
        }

        tracing::trace!(meter = %self.name, measurement = n, "MockMeter: acquired");
        Ok(table)
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.faults.check(&self.name, "shutdown")
    }
}

impl std::fmt::Debug for MockMeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockMeter")
            .field("name", &self.name)
            .field("columns", &self.columns)
            .field("rows", &self.rows)
            .finish()
    }
}
