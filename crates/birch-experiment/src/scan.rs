//! The scan work unit.
//!
//! A [`Scan`] pairs an ordered list of movement axes with a list of
//! measurement probes. Its execute phase (see [`crate::sweep`]) walks the
//! Cartesian product of the axis positions and triggers every probe at each
//! visited point.
//!
//! The scan owns a [`ScanCursor`]: one index per axis plus the number of
//! completed steps. The cursor survives pause/abort, so re-running a scan
//! continues exactly where it stopped.
//!
//! # Example
//!
//! ```rust,ignore
//! let settings = ScanSettings::new("tritellurides", "raster_01")
//!     .with_scan_type("2D Scan")
//!     .with_job_type("Raman");
//!
//! let scan = Scan::new(settings, "owner", "S001")
//!     .with_movement(MovementAxis::new(stage_x, vec![0.0, 1.0, 2.0])?)
//!     .with_movement(MovementAxis::linspace(stage_y, 0.0, 5.0, 6)?)
//!     .with_measurement(MeasurementProbe::new(spectrometer));
//! ```

use birch_core::{
    AppResult, BirchError, ColumnSpec, ExecutionPhase, Measurement, Movement, SettingsMap,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::extension::ScanExtension;

/// Descriptive settings of a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Project the scan belongs to (e.g. "rare_earth_tritellurides").
    pub project_name: String,
    /// Scan name, unique within the project.
    pub scan_name: String,
    /// Kind of scan (e.g. "1D Scan", "Focus Scan").
    #[serde(default)]
    pub scan_type: String,
    /// Measurement technique (e.g. "Raman", "Transport").
    #[serde(default)]
    pub job_type: String,
    /// Free-form tags.
    #[serde(default)]
    pub additional_tags: Vec<String>,
}

impl ScanSettings {
    /// Settings with only the identifying names filled in.
    pub fn new(project_name: impl Into<String>, scan_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            scan_name: scan_name.into(),
            scan_type: String::new(),
            job_type: String::new(),
            additional_tags: Vec::new(),
        }
    }

    /// Set the scan type.
    pub fn with_scan_type(mut self, scan_type: impl Into<String>) -> Self {
        self.scan_type = scan_type.into();
        self
    }

    /// Set the job type.
    pub fn with_job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = job_type.into();
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.additional_tags.push(tag.into());
        self
    }

    /// Identifier derived from project and scan name.
    pub fn scan_id(&self) -> String {
        format!("{}_{}", self.project_name, self.scan_name)
    }
}

/// A movement instrument and the positions it steps through.
pub struct MovementAxis {
    pub(crate) movement: Arc<dyn Movement>,
    pub(crate) positions: Vec<f64>,
    pub(crate) settings: SettingsMap,
    pub(crate) runtime_initialized: bool,
}

impl MovementAxis {
    /// Create an axis. An empty position list is rejected.
    pub fn new(movement: Arc<dyn Movement>, positions: Vec<f64>) -> AppResult<Self> {
        if positions.is_empty() {
            return Err(BirchError::InvalidAxis(format!(
                "axis '{}' has no positions",
                movement.name()
            )));
        }
        Ok(Self {
            movement,
            positions,
            settings: SettingsMap::new(),
            runtime_initialized: false,
        })
    }

    /// Evenly spaced positions from `start` to `stop` inclusive.
    pub fn linspace(
        movement: Arc<dyn Movement>,
        start: f64,
        stop: f64,
        points: usize,
    ) -> AppResult<Self> {
        let positions = match points {
            0 => Vec::new(),
            1 => vec![start],
            n => {
                let step = (stop - start) / (n - 1) as f64;
                (0..n).map(|i| start + step * i as f64).collect()
            }
        };
        Self::new(movement, positions)
    }

    /// Settings applied when the axis is initialized.
    pub fn with_settings(mut self, settings: SettingsMap) -> Self {
        self.settings = settings;
        self
    }

    /// The movement instrument.
    pub fn movement(&self) -> &Arc<dyn Movement> {
        &self.movement
    }

    /// Target positions.
    pub fn positions(&self) -> &[f64] {
        &self.positions
    }

    /// Settings map.
    pub fn settings(&self) -> &SettingsMap {
        &self.settings
    }

    /// Whether the instrument was initialized during the current run.
    pub fn is_runtime_initialized(&self) -> bool {
        self.runtime_initialized
    }

    fn describe(&self) -> AxisDescriptor {
        AxisDescriptor {
            instrument: self.movement.name().to_string(),
            position_column: self.movement.position_column().to_string(),
            position_units: self.movement.position_units().to_string(),
            positions: self.positions.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl std::fmt::Debug for MovementAxis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MovementAxis")
            .field("movement", &self.movement.name())
            .field("positions", &self.positions)
            .field("runtime_initialized", &self.runtime_initialized)
            .finish()
    }
}

/// A measurement instrument triggered at every sweep point.
pub struct MeasurementProbe {
    pub(crate) measurement: Arc<dyn Measurement>,
    pub(crate) settings: SettingsMap,
    pub(crate) runtime_initialized: bool,
}

impl MeasurementProbe {
    /// Create a probe with empty settings.
    pub fn new(measurement: Arc<dyn Measurement>) -> Self {
        Self {
            measurement,
            settings: SettingsMap::new(),
            runtime_initialized: false,
        }
    }

    /// Settings applied when the probe is initialized.
    pub fn with_settings(mut self, settings: SettingsMap) -> Self {
        self.settings = settings;
        self
    }

    /// The measurement instrument.
    pub fn measurement(&self) -> &Arc<dyn Measurement> {
        &self.measurement
    }

    /// Settings map.
    pub fn settings(&self) -> &SettingsMap {
        &self.settings
    }

    /// Whether the instrument was initialized during the current run.
    pub fn is_runtime_initialized(&self) -> bool {
        self.runtime_initialized
    }

    fn describe(&self) -> ProbeDescriptor {
        ProbeDescriptor {
            instrument: self.measurement.name().to_string(),
            columns: self.measurement.columns(),
            settings: self.settings.clone(),
        }
    }
}

impl std::fmt::Debug for MeasurementProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeasurementProbe")
            .field("measurement", &self.measurement.name())
            .field("runtime_initialized", &self.runtime_initialized)
            .finish()
    }
}

/// Resumable position of a sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCursor {
    /// Current position index of every axis.
    pub indices: Vec<usize>,
    /// Number of completed sweep steps.
    pub master_index: usize,
}

/// Serializable summary of a movement axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisDescriptor {
    /// Movement instrument name.
    pub instrument: String,
    /// Position column name.
    pub position_column: String,
    /// Position units.
    pub position_units: String,
    /// Target positions.
    pub positions: Vec<f64>,
    /// Settings map.
    #[serde(default)]
    pub settings: SettingsMap,
}

/// Serializable summary of a measurement probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeDescriptor {
    /// Measurement instrument name.
    pub instrument: String,
    /// Columns the instrument produces.
    pub columns: Vec<ColumnSpec>,
    /// Settings map.
    #[serde(default)]
    pub settings: SettingsMap,
}

/// Serializable summary of a scan, without live instruments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanDescriptor {
    /// Scan settings.
    pub settings: ScanSettings,
    /// Person running the scan.
    pub owner: String,
    /// Sample the scan is performed on.
    pub sample_id: String,
    /// Movement axes in sweep order (axis 0 varies fastest).
    pub movements: Vec<AxisDescriptor>,
    /// Measurement probes.
    pub measurements: Vec<ProbeDescriptor>,
}

/// A unit of work: movements, measurements, extensions and a sweep cursor.
pub struct Scan {
    pub(crate) settings: ScanSettings,
    pub(crate) owner: String,
    pub(crate) sample_id: String,
    pub(crate) movements: Vec<MovementAxis>,
    pub(crate) measurements: Vec<MeasurementProbe>,
    pub(crate) extensions: Vec<Arc<dyn ScanExtension>>,
    pub(crate) cursor: ScanCursor,
}

impl Scan {
    /// Create a scan with no axes, probes or extensions.
    pub fn new(
        settings: ScanSettings,
        owner: impl Into<String>,
        sample_id: impl Into<String>,
    ) -> Self {
        Self {
            settings,
            owner: owner.into(),
            sample_id: sample_id.into(),
            movements: Vec::new(),
            measurements: Vec::new(),
            extensions: Vec::new(),
            cursor: ScanCursor::default(),
        }
    }

    /// Append a movement axis. The first axis added varies fastest.
    pub fn with_movement(mut self, axis: MovementAxis) -> Self {
        self.movements.push(axis);
        self.cursor.indices.push(0);
        self
    }

    /// Append a measurement probe.
    pub fn with_measurement(mut self, probe: MeasurementProbe) -> Self {
        self.measurements.push(probe);
        self
    }

    /// Attach an extension.
    pub fn with_extension(mut self, extension: Arc<dyn ScanExtension>) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Continue from a previously saved cursor.
    pub fn with_cursor(mut self, cursor: ScanCursor) -> AppResult<Self> {
        self.set_cursor(cursor)?;
        Ok(self)
    }

    /// Identifier derived from project and scan name.
    pub fn id(&self) -> String {
        self.settings.scan_id()
    }

    /// Scan settings.
    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    /// Scan name.
    pub fn name(&self) -> &str {
        &self.settings.scan_name
    }

    /// Owner of the scan.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Sample the scan runs on.
    pub fn sample_id(&self) -> &str {
        &self.sample_id
    }

    /// Movement axes.
    pub fn movements(&self) -> &[MovementAxis] {
        &self.movements
    }

    /// Measurement probes.
    pub fn measurements(&self) -> &[MeasurementProbe] {
        &self.measurements
    }

    /// Current sweep cursor.
    pub fn cursor(&self) -> &ScanCursor {
        &self.cursor
    }

    /// Replace the cursor. Rejected when it does not fit the axes.
    pub fn set_cursor(&mut self, cursor: ScanCursor) -> AppResult<()> {
        if cursor.indices.len() != self.movements.len() {
            return Err(BirchError::InvalidState(format!(
                "cursor has {} indices but scan has {} axes",
                cursor.indices.len(),
                self.movements.len()
            )));
        }
        for (axis, (&idx, movement)) in cursor.indices.iter().zip(&self.movements).enumerate() {
            if idx >= movement.positions.len() {
                return Err(BirchError::InvalidState(format!(
                    "cursor index {} out of range for axis {} with {} positions",
                    idx,
                    axis,
                    movement.positions.len()
                )));
            }
        }
        let total = self.total_points();
        if cursor.master_index > total {
            return Err(BirchError::InvalidState(format!(
                "cursor has {} completed steps but scan has {} points",
                cursor.master_index, total
            )));
        }
        self.cursor = cursor;
        Ok(())
    }

    /// Reject axes that would write the same position column.
    pub fn check_position_columns(&self) -> AppResult<()> {
        let mut seen = HashSet::new();
        for axis in &self.movements {
            let movement = &axis.movement;
            let header =
                ColumnSpec::position_header(movement.position_column(), movement.position_units());
            if !seen.insert(header.clone()) {
                return Err(BirchError::InvalidAxis(format!(
                    "axis '{}' duplicates position column '{}'",
                    movement.name(),
                    header
                )));
            }
        }
        Ok(())
    }

    /// Number of points the sweep visits.
    pub fn total_points(&self) -> usize {
        crate::sweep::total_points(&self.axis_lengths())
    }

    /// Fraction of completed points.
    pub fn progress(&self) -> f64 {
        self.cursor.master_index as f64 / self.total_points() as f64
    }

    pub(crate) fn axis_lengths(&self) -> Vec<usize> {
        self.movements.iter().map(|m| m.positions.len()).collect()
    }

    /// Rewind the cursor and mark every instrument uninitialized.
    pub fn reset(&mut self) {
        self.cursor = ScanCursor {
            indices: vec![0; self.movements.len()],
            master_index: 0,
        };
        for axis in &mut self.movements {
            axis.runtime_initialized = false;
        }
        for probe in &mut self.measurements {
            probe.runtime_initialized = false;
        }
        debug!(scan = %self.settings.scan_name, "Scan state reset");
    }

    /// Serializable summary.
    pub fn describe(&self) -> ScanDescriptor {
        ScanDescriptor {
            settings: self.settings.clone(),
            owner: self.owner.clone(),
            sample_id: self.sample_id.clone(),
            movements: self.movements.iter().map(MovementAxis::describe).collect(),
            measurements: self.measurements.iter().map(MeasurementProbe::describe).collect(),
        }
    }

    /// Startup hook.
    ///
    /// Runs the extensions' startup, then connects every instrument. Instruments
    /// not yet initialized in this run are also initialized and configured.
    pub async fn startup(&mut self) -> AppResult<()> {
        let fail = |e| BirchError::execution(ExecutionPhase::Startup, e);
        self.check_position_columns()?;

        info!(
            scan = %self.settings.scan_name,
            sample = %self.sample_id,
            owner = %self.owner,
            "Starting up scan"
        );

        for extension in &self.extensions {
            extension.startup(&self.settings).await.map_err(fail)?;
        }

        for axis in &mut self.movements {
            axis.movement.connect().await.map_err(fail)?;
            if !axis.runtime_initialized {
                axis.movement.initialize().await.map_err(fail)?;
                axis.movement
                    .apply_settings(&axis.settings)
                    .await
                    .map_err(fail)?;
                axis.runtime_initialized = true;
            }
        }

        for probe in &mut self.measurements {
            probe.measurement.connect().await.map_err(fail)?;
            if !probe.runtime_initialized {
                probe.measurement.initialize().await.map_err(fail)?;
                probe
                    .measurement
                    .apply_settings(&probe.settings)
                    .await
                    .map_err(fail)?;
                probe.runtime_initialized = true;
            }
        }

        Ok(())
    }

    /// Shutdown hook.
    ///
    /// Every extension and instrument is shut down even if an earlier one
    /// fails; the first failure is returned.
    pub async fn shutdown(&mut self) -> AppResult<()> {
        let mut first_error: Option<anyhow::Error> = None;
        let mut record = |result: anyhow::Result<()>, what: &str| {
            if let Err(e) = result {
                warn!(scan = %self.settings.scan_name, instrument = what, error = %e, "Shutdown step failed");
                first_error.get_or_insert(e);
            }
        };

        for extension in &self.extensions {
            record(extension.shutdown().await, extension.name());
        }
        for axis in &self.movements {
            record(axis.movement.shutdown().await, axis.movement.name());
        }
        for probe in &self.measurements {
            record(probe.measurement.shutdown().await, probe.measurement.name());
        }

        match first_error {
            Some(e) => Err(BirchError::execution(ExecutionPhase::Shutdown, e)),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Scan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scan")
            .field("settings", &self.settings)
            .field("owner", &self.owner)
            .field("sample_id", &self.sample_id)
            .field("movements", &self.movements)
            .field("measurements", &self.measurements)
            .field("extensions", &self.extensions.len())
            .field("cursor", &self.cursor)
            .finish()
    }
}
