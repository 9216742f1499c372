//! Scan work units for birch.
//!
//! - [`scan`]: the [`Scan`] work unit, its axes, probes and cursor
//! - [`sweep`]: the odometer-order sweep executor
//! - [`control`]: cooperative cancellation ([`CancellationToken`], [`Interrupt`])
//! - [`extension`]: lifecycle observers ([`ScanExtension`], [`TableRecorder`])

pub mod control;
pub mod extension;
pub mod scan;
pub mod sweep;

pub use control::{CancellationToken, Interrupt, NeverInterrupt};
pub use extension::{AxisMove, RecordedTable, ScanExtension, TableRecorder};
pub use scan::{
    AxisDescriptor, MeasurementProbe, MovementAxis, ProbeDescriptor, Scan, ScanCursor,
    ScanDescriptor, ScanSettings,
};
pub use sweep::{StepProgress, SweepOutcome};
