//! Configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (`config/birch.toml` by default)
//! 2. environment variables prefixed with `BIRCH_`; `__` separates nesting
//!    levels, e.g. `BIRCH_QUEUE__MAX_PARALLEL_SCANS=2`
//!
//! # Example
//! ```no_run
//! use birch::config::BirchConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BirchConfig::load_from("config/birch.toml")?;
//! config.validate()?;
//! println!("{} scans configured", config.scans.len());
//! # Ok(())
//! # }
//! ```

use birch_core::{AppResult, BirchError, SettingsMap};
use birch_driver_mock::{MOCK_METER, MOCK_STAGE};
use birch_experiment::ScanSettings;
use birch_queue::{QueueOptions, ScanRecord};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::logging::{parse_log_level, OutputFormat};

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/birch.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BirchConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Queue construction options
    #[serde(default)]
    pub queue: QueueOptions,
    /// Instrument definitions
    #[serde(default)]
    pub instruments: Vec<InstrumentDefinition>,
    /// Scans to enqueue, in order
    #[serde(default)]
    pub scans: Vec<ScanDefinition>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default)]
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
        }
    }
}

/// Instrument definition in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentDefinition {
    /// Unique instrument identifier, also the instrument's name
    pub id: String,
    /// Instrument type ("mock_stage", "mock_meter")
    pub r#type: String,
    /// Whether this instrument is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Instrument-specific configuration
    #[serde(default = "empty_table")]
    pub config: toml::Value,
}

/// One scan to build and enqueue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanDefinition {
    /// Project name
    pub project: String,
    /// Scan name, unique within the project
    pub name: String,
    /// Kind of scan (e.g. "2D Scan")
    #[serde(default)]
    pub scan_type: String,
    /// Measurement technique (e.g. "Raman")
    #[serde(default)]
    pub job_type: String,
    /// Person running the scan
    #[serde(default)]
    pub owner: String,
    /// Sample identifier
    #[serde(default)]
    pub sample_id: String,
    /// Free-form tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Movement axes; the first one varies fastest
    #[serde(default)]
    pub movements: Vec<AxisDefinition>,
    /// Measurement probes
    #[serde(default)]
    pub measurements: Vec<ProbeDefinition>,
}

impl ScanDefinition {
    /// Scan id the queue will assign (`<project>_<name>`).
    pub fn scan_id(&self) -> String {
        self.settings().scan_id()
    }

    /// Work unit settings.
    pub fn settings(&self) -> ScanSettings {
        let mut settings = ScanSettings::new(&self.project, &self.name)
            .with_scan_type(&self.scan_type)
            .with_job_type(&self.job_type);
        for tag in &self.tags {
            settings = settings.with_tag(tag);
        }
        settings
    }

    /// Definition equivalent to a snapshot record.
    pub fn from_record(record: &ScanRecord) -> Self {
        let desc = &record.scan;
        Self {
            project: desc.settings.project_name.clone(),
            name: desc.settings.scan_name.clone(),
            scan_type: desc.settings.scan_type.clone(),
            job_type: desc.settings.job_type.clone(),
            owner: desc.owner.clone(),
            sample_id: desc.sample_id.clone(),
            tags: desc.settings.additional_tags.clone(),
            movements: desc
                .movements
                .iter()
                .map(|axis| AxisDefinition {
                    instrument: axis.instrument.clone(),
                    positions: Some(axis.positions.clone()),
                    start: None,
                    stop: None,
                    points: None,
                    settings: axis.settings.clone(),
                })
                .collect(),
            measurements: desc
                .measurements
                .iter()
                .map(|probe| ProbeDefinition {
                    instrument: probe.instrument.clone(),
                    settings: probe.settings.clone(),
                })
                .collect(),
        }
    }
}

/// A movement axis: explicit `positions`, or `start`/`stop`/`points`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisDefinition {
    /// Movement instrument id
    pub instrument: String,
    /// Explicit positions
    #[serde(default)]
    pub positions: Option<Vec<f64>>,
    /// First position of an evenly spaced range
    #[serde(default)]
    pub start: Option<f64>,
    /// Last position of an evenly spaced range
    #[serde(default)]
    pub stop: Option<f64>,
    /// Number of positions of an evenly spaced range
    #[serde(default)]
    pub points: Option<usize>,
    /// Settings applied when the axis is initialized
    #[serde(default)]
    pub settings: SettingsMap,
}

impl AxisDefinition {
    /// Resolve the position list. Empty lists are rejected.
    pub fn resolve_positions(&self) -> AppResult<Vec<f64>> {
        let positions = match (&self.positions, self.start, self.stop, self.points) {
            (Some(positions), None, None, None) => positions.clone(),
            (None, Some(start), Some(stop), Some(points)) => linspace(start, stop, points),
            _ => {
                return Err(BirchError::Configuration(format!(
                    "axis '{}' needs either `positions` or `start`, `stop` and `points`",
                    self.instrument
                )))
            }
        };
        if positions.is_empty() {
            return Err(BirchError::InvalidAxis(format!(
                "axis '{}' has no positions",
                self.instrument
            )));
        }
        Ok(positions)
    }
}

/// A measurement probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeDefinition {
    /// Measurement instrument id
    pub instrument: String,
    /// Settings applied when the probe is initialized
    #[serde(default)]
    pub settings: SettingsMap,
}

fn linspace(start: f64, stop: f64, points: usize) -> Vec<f64> {
    match points {
        0 => Vec::new(),
        1 => vec![start],
        n => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

fn default_app_name() -> String {
    "birch".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_enabled() -> bool {
    true
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

impl BirchConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    /// The provider stack, for callers that merge their own overrides.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("BIRCH_").split("__"))
    }

    /// Semantic checks that deserialization cannot express.
    pub fn validate(&self) -> AppResult<()> {
        parse_log_level(&self.application.log_level)?;

        if self.queue.max_parallel_scans == 0 {
            return Err(BirchError::Configuration(
                "queue.max_parallel_scans must be at least 1".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        for instrument in &self.instruments {
            if !ids.insert(instrument.id.as_str()) {
                return Err(BirchError::Configuration(format!(
                    "Duplicate instrument ID: {}",
                    instrument.id
                )));
            }
            birch_driver_mock::validate(&instrument.r#type, &instrument.config).map_err(|e| {
                BirchError::Configuration(format!("instrument '{}': {e:#}", instrument.id))
            })?;
        }

        let mut scan_ids = HashSet::new();
        for scan in &self.scans {
            let scan_id = scan.scan_id();
            if !scan_ids.insert(scan_id.clone()) {
                return Err(BirchError::Configuration(format!(
                    "Duplicate scan: {scan_id}"
                )));
            }
            for axis in &scan.movements {
                self.require_instrument(&scan_id, &axis.instrument, MOCK_STAGE)?;
                axis.resolve_positions()?;
            }
            for probe in &scan.measurements {
                self.require_instrument(&scan_id, &probe.instrument, MOCK_METER)?;
            }
        }

        Ok(())
    }

    fn require_instrument(&self, scan_id: &str, id: &str, kind: &str) -> AppResult<()> {
        let instrument = self
            .instruments
            .iter()
            .find(|i| i.id == id)
            .ok_or_else(|| {
                BirchError::Configuration(format!(
                    "scan '{scan_id}' references unknown instrument '{id}'"
                ))
            })?;
        if !instrument.enabled {
            return Err(BirchError::Configuration(format!(
                "scan '{scan_id}' references disabled instrument '{id}'"
            )));
        }
        if instrument.r#type != kind {
            return Err(BirchError::Configuration(format!(
                "scan '{scan_id}' uses '{id}' ({}) where a {kind} is required",
                instrument.r#type
            )));
        }
        Ok(())
    }

    /// All enabled instruments
    pub fn enabled_instruments(&self) -> Vec<&InstrumentDefinition> {
        self.instruments.iter().filter(|inst| inst.enabled).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> BirchConfig {
        Figment::new().merge(Toml::string(text)).extract().unwrap()
    }

    const RASTER: &str = r#"
        [queue]
        id = "lab"
        execution_mode = "parallel"

        [[instruments]]
        id = "stage_x"
        type = "mock_stage"
        config = { position_column = "X", units = "um" }

        [[instruments]]
        id = "dmm"
        type = "mock_meter"

        [[scans]]
        project = "tritellurides"
        name = "raster"
        owner = "alice"
        sample_id = "S001"

        [[scans.movements]]
        instrument = "stage_x"
        start = 0.0
        stop = 10.0
        points = 3

        [[scans.measurements]]
        instrument = "dmm"
    "#;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = parse("");
        assert_eq!(config.application.name, "birch");
        assert_eq!(config.application.log_level, "info");
        assert_eq!(config.queue, QueueOptions::default());
        assert!(config.instruments.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_raster_config_is_valid() {
        let config = parse(RASTER);
        assert!(config.validate().is_ok());
        assert_eq!(config.queue.id, "lab");
        assert_eq!(config.queue.execution_mode, birch_queue::ExecutionMode::Parallel);
        assert_eq!(config.scans[0].scan_id(), "tritellurides_raster");
        assert_eq!(
            config.scans[0].movements[0].resolve_positions().unwrap(),
            vec![0.0, 5.0, 10.0]
        );
        assert!(config.instruments[1].enabled);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = parse(RASTER);
        config.application.log_level = "loud".to_string();
        assert!(matches!(config.validate(), Err(BirchError::Configuration(_))));
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let mut config = parse(RASTER);
        config.queue.max_parallel_scans = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_and_disabled_instruments_rejected() {
        let mut config = parse(RASTER);
        config.scans[0].measurements[0].instrument = "scope".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("unknown instrument 'scope'"));

        let mut config = parse(RASTER);
        config.instruments[1].enabled = false;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("disabled instrument 'dmm'"));
    }

    #[test]
    fn test_instrument_kind_mismatch_rejected() {
        let mut config = parse(RASTER);
        config.scans[0].movements[0].instrument = "dmm".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_axis_rejected() {
        let mut config = parse(RASTER);
        let axis = &mut config.scans[0].movements[0];
        axis.start = None;
        axis.stop = None;
        axis.points = None;
        axis.positions = Some(Vec::new());
        assert!(matches!(config.validate(), Err(BirchError::InvalidAxis(_))));
    }

    #[test]
    fn test_ambiguous_axis_rejected() {
        let mut config = parse(RASTER);
        config.scans[0].movements[0].positions = Some(vec![1.0]);
        assert!(matches!(config.validate(), Err(BirchError::Configuration(_))));
    }

    #[test]
    fn test_bad_instrument_config_rejected() {
        let mut config = parse(RASTER);
        config.instruments[0].config = toml::from_str("speed = 3").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut config = parse(RASTER);
        config.instruments.push(config.instruments[0].clone());
        assert!(config.validate().unwrap_err().to_string().contains("Duplicate instrument"));

        let mut config = parse(RASTER);
        config.scans.push(config.scans[0].clone());
        assert!(config.validate().unwrap_err().to_string().contains("Duplicate scan"));
    }
}
