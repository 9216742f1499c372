//! Instrument capabilities used by scans.
//!
//! A scan only ever talks to instruments through two small traits:
//!
//! - [`Movement`]: something with a settable position (stage, rotator, laser wavelength)
//! - [`Measurement`]: something that produces a table of readings (meter, spectrometer)
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Takes `&self`; drivers keep their own interior state
//!
//! The sweep executor calls these synchronously from the scan's own task, so a
//! driver instance is never driven by two scans at once unless the caller
//! shares it between scans in parallel mode.
//!
//! # Example
//!
//! ```rust,ignore
//! struct PiezoStage { position: RwLock<f64> }
//!
//! #[async_trait]
//! impl Movement for PiezoStage {
//!     fn name(&self) -> &str { "piezo_x" }
//!     fn position_column(&self) -> &str { "X" }
//!     fn position_units(&self) -> &str { "um" }
//!     async fn connect(&self) -> Result<()> { Ok(()) }
//!     async fn move_to(&self, position: f64) -> Result<()> {
//!         *self.position.write() = position;
//!         Ok(())
//!     }
//!     async fn position(&self) -> Result<f64> { Ok(*self.position.read()) }
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;

use crate::data::{ColumnSpec, DataTable};

/// Free-form instrument settings.
///
/// Ordered so serialized snapshots are stable.
pub type SettingsMap = std::collections::BTreeMap<String, serde_json::Value>;

/// Capability: positioning hardware that a scan steps through a list of targets.
#[async_trait]
pub trait Movement: Send + Sync {
    /// Instrument name, used in logs and data column headers.
    fn name(&self) -> &str;

    /// Name of the position column appended to measurement tables (e.g. "X").
    fn position_column(&self) -> &str;

    /// Units of the position (e.g. "mm").
    fn position_units(&self) -> &str;

    /// Open the connection to the hardware.
    ///
    /// Called at every scan startup, including when a paused scan is resumed,
    /// so implementations should treat an already-open connection as success.
    async fn connect(&self) -> Result<()>;

    /// One-time hardware preparation (homing, reference search).
    ///
    /// Called once per scan run; a resumed scan does not initialize again.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Apply a settings map.
    async fn apply_settings(&self, _settings: &SettingsMap) -> Result<()> {
        Ok(())
    }

    /// Read back the current settings.
    async fn settings(&self) -> Result<SettingsMap> {
        Ok(SettingsMap::new())
    }

    /// Move to an absolute position and return once it has settled.
    async fn move_to(&self, position: f64) -> Result<()>;

    /// Current position as reported by the hardware.
    async fn position(&self) -> Result<f64>;

    /// Release the hardware.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Capability: hardware that returns a table of readings per trigger.
#[async_trait]
pub trait Measurement: Send + Sync {
    /// Instrument name, used as the data-sink key.
    fn name(&self) -> &str;

    /// Columns produced by [`Measurement::perform_measurement`].
    fn columns(&self) -> Vec<ColumnSpec>;

    /// Open the connection to the hardware.
    async fn connect(&self) -> Result<()>;

    /// One-time hardware preparation.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Apply a settings map.
    async fn apply_settings(&self, _settings: &SettingsMap) -> Result<()> {
        Ok(())
    }

    /// Read back the current settings.
    async fn settings(&self) -> Result<SettingsMap> {
        Ok(SettingsMap::new())
    }

    /// Take one measurement.
    ///
    /// The returned table must use the headers of [`Measurement::columns`].
    async fn perform_measurement(&self) -> Result<DataTable>;

    /// Release the hardware.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
