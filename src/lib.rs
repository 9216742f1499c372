//! # birch
//!
//! Scan queue scheduler and N-dimensional sweep executor for laboratory
//! instruments. This crate is the application layer; the building blocks live
//! in the workspace crates and are re-exported here:
//!
//! - [`birch_core`]: errors, instrument capability traits, data tables
//! - [`birch_experiment`]: the `Scan` work unit and its sweep executor
//! - [`birch_queue`]: the `ScanQueue` scheduler
//! - [`birch_driver_mock`]: simulated instruments
//!
//! ## Crate Structure
//!
//! - **`config`**: figment-based configuration (`BirchConfig`)
//! - **`logging`**: tracing subscriber setup
//! - **`app`**: builds a `Session` (queue, instruments, recorders) from configuration

pub mod app;
pub mod config;
pub mod logging;

pub use birch_core;
pub use birch_driver_mock;
pub use birch_experiment;
pub use birch_queue;

pub use app::{describe_snapshot, Session};
pub use config::BirchConfig;
