//! `birch-core`
//!
//! Core trait definitions and types shared by the birch crates.
//!
//! ## Key Types
//!
//! - [`Movement`] / [`Measurement`]: instrument capabilities a scan drives
//! - [`DataTable`]: tabular result of one measurement
//! - [`BirchError`]: error taxonomy for structural and execution failures

pub mod capabilities;
pub mod data;
pub mod error;

pub use capabilities::{Measurement, Movement, SettingsMap};
pub use data::{ColumnSpec, DataTable};
pub use error::{AppResult, BirchError, ExecutionPhase};
