//! Mock instruments for birch.
//!
//! Simulated hardware for tests and for running queues without a lab.
//! All delays use `tokio::time::sleep`.
//!
//! - [`MockStage`]: a single-axis [`Movement`](birch_core::Movement) that records its moves
//! - [`MockMeter`]: a [`Measurement`](birch_core::Measurement) with deterministic readings
//!
//! Both support failure injection through [`FaultPlan`].
//!
//! # Building from configuration
//!
//! ```rust,ignore
//! let config: toml::Value = toml::from_str("units = \"um\"")?;
//! match birch_driver_mock::build("mock_stage", "piezo_x", config)? {
//!     MockInstrument::Stage(stage) => { /* ... */ }
//!     MockInstrument::Meter(meter) => { /* ... */ }
//! }
//! ```

use anyhow::{bail, Result};
use std::sync::Arc;

pub mod faults;
mod mock_meter;
mod mock_stage;

pub use faults::{Fault, FaultPlan};
pub use mock_meter::{MockMeter, MockMeterConfig};
pub use mock_stage::{MockStage, MockStageConfig};

/// Instrument type name of [`MockStage`].
pub const MOCK_STAGE: &str = "mock_stage";
/// Instrument type name of [`MockMeter`].
pub const MOCK_METER: &str = "mock_meter";

/// Instrument types this crate can build.
pub const DRIVER_TYPES: &[&str] = &[MOCK_STAGE, MOCK_METER];

/// A mock instrument built from configuration.
#[derive(Debug, Clone)]
pub enum MockInstrument {
    /// A movement instrument.
    Stage(Arc<MockStage>),
    /// A measurement instrument.
    Meter(Arc<MockMeter>),
}

/// Check that `config` deserializes for `driver_type`.
pub fn validate(driver_type: &str, config: &toml::Value) -> Result<()> {
    match driver_type {
        MOCK_STAGE => {
            let _: MockStageConfig = config.clone().try_into()?;
        }
        MOCK_METER => {
            let _: MockMeterConfig = config.clone().try_into()?;
        }
        other => bail!("unknown instrument type '{other}'"),
    }
    Ok(())
}

/// Build an instrument of `driver_type` named `name`.
pub fn build(driver_type: &str, name: &str, config: toml::Value) -> Result<MockInstrument> {
    match driver_type {
        MOCK_STAGE => {
            let cfg: MockStageConfig = config.try_into()?;
            Ok(MockInstrument::Stage(Arc::new(MockStage::with_config(name, cfg))))
        }
        MOCK_METER => {
            let cfg: MockMeterConfig = config.try_into()?;
            Ok(MockInstrument::Meter(Arc::new(MockMeter::with_config(name, cfg))))
        }
        other => bail!("unknown instrument type '{other}'"),
    }
}
