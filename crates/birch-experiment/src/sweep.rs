//! N-dimensional sweep executor.
//!
//! Walks the Cartesian product of the movement axes in odometer order:
//! axis 0 varies fastest and carries into axis 1 when it wraps, and so on.
//! Axes of lengths 3 and 2 are visited as
//!
//! ```text
//! (0,0) (1,0) (2,0) (0,1) (1,1) (2,1)
//! ```
//!
//! At every step only the axes whose index changed since the previous step
//! are moved (all of them on the first step after (re)entry), then every
//! measurement probe is triggered and its table is extended with the current
//! position of each axis before it is handed to the data sinks.
//!
//! The interrupt check runs before each step. A step is committed only after
//! all of its measurements were saved, so a stopped sweep can be re-entered
//! without skipping or repeating a point.

use anyhow::{Context, Result};
use birch_core::{AppResult, BirchError, ColumnSpec, ExecutionPhase};
use tracing::{debug, trace};

use crate::control::Interrupt;
use crate::extension::AxisMove;
use crate::scan::{Scan, ScanCursor};

/// How a sweep returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Every point was visited.
    Completed,
    /// The interrupt check fired at a step boundary.
    Interrupted,
}

/// Reported after every committed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepProgress {
    /// Cursor a re-entered sweep would continue from.
    pub cursor: ScanCursor,
    /// Total number of steps.
    pub total: usize,
}

impl StepProgress {
    /// Steps completed so far.
    pub fn master_index(&self) -> usize {
        self.cursor.master_index
    }

    /// Completed fraction in [0, 1].
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.cursor.master_index as f64 / self.total as f64
        }
    }
}

/// Number of points visited for the given axis lengths. No axes means one point.
pub fn total_points(lengths: &[usize]) -> usize {
    lengths.iter().product()
}

/// Advance the odometer by one step. Returns `false` when it wrapped around completely.
pub fn advance(indices: &mut [usize], lengths: &[usize]) -> bool {
    for (idx, &len) in indices.iter_mut().zip(lengths) {
        *idx += 1;
        if *idx >= len {
            *idx = 0;
        } else {
            return true;
        }
    }
    false
}

/// Axes whose index differs from `previous`. Every axis when there is no previous step.
pub fn changed_axes(previous: Option<&[usize]>, current: &[usize]) -> Vec<usize> {
    match previous {
        None => (0..current.len()).collect(),
        Some(prev) => current
            .iter()
            .zip(prev)
            .enumerate()
            .filter(|(_, (cur, prev))| cur != prev)
            .map(|(i, _)| i)
            .collect(),
    }
}

impl Scan {
    /// Execute phase: run the sweep from the current cursor.
    ///
    /// `on_step` is called after each committed step.
    pub async fn execute(
        &mut self,
        interrupt: &dyn Interrupt,
        on_step: &mut (dyn FnMut(StepProgress) + Send),
    ) -> AppResult<SweepOutcome> {
        self.sweep(interrupt, on_step)
            .await
            .map_err(|e| BirchError::execution(ExecutionPhase::Sweep, e))
    }

    async fn sweep(
        &mut self,
        interrupt: &dyn Interrupt,
        on_step: &mut (dyn FnMut(StepProgress) + Send),
    ) -> Result<SweepOutcome> {
        let lengths = self.axis_lengths();
        let total = total_points(&lengths);

        if self.cursor.master_index >= total {
            debug!(scan = %self.settings.scan_name, "Sweep already complete");
            return Ok(SweepOutcome::Completed);
        }

        for extension in &self.extensions {
            extension
                .execute()
                .await
                .with_context(|| format!("extension '{}' failed in execute", extension.name()))?;
        }

        debug!(
            scan = %self.settings.scan_name,
            total,
            start = self.cursor.master_index,
            "Sweep started"
        );

        let mut previous: Option<Vec<usize>> = None;
        loop {
            if interrupt.is_interrupted() {
                debug!(
                    scan = %self.settings.scan_name,
                    master_index = self.cursor.master_index,
                    "Sweep interrupted at step boundary"
                );
                return Ok(SweepOutcome::Interrupted);
            }

            let changed = changed_axes(previous.as_deref(), &self.cursor.indices);
            let moves: Vec<AxisMove> = changed
                .into_iter()
                .map(|axis| {
                    let movement = &self.movements[axis];
                    AxisMove {
                        axis,
                        instrument: movement.movement.name().to_string(),
                        position: movement.positions[self.cursor.indices[axis]],
                    }
                })
                .collect();
            self.move_to_positions(&moves).await?;
            previous = Some(self.cursor.indices.clone());

            self.take_measurements().await?;

            self.cursor.master_index += 1;
            let done = self.cursor.master_index >= total;
            if !done {
                advance(&mut self.cursor.indices, &lengths);
            }
            on_step(StepProgress {
                cursor: self.cursor.clone(),
                total,
            });
            if done {
                return Ok(SweepOutcome::Completed);
            }
        }
    }

    async fn move_to_positions(&self, moves: &[AxisMove]) -> Result<()> {
        for extension in &self.extensions {
            extension.move_to_positions(moves).await.with_context(|| {
                format!("extension '{}' failed in move_to_positions", extension.name())
            })?;
        }

        for mv in moves {
            trace!(instrument = %mv.instrument, position = mv.position, "Moving");
            self.movements[mv.axis]
                .movement
                .move_to(mv.position)
                .await
                .with_context(|| format!("moving '{}' to {}", mv.instrument, mv.position))?;
        }
        Ok(())
    }

    async fn take_measurements(&self) -> Result<()> {
        for extension in &self.extensions {
            extension.take_measurements().await.with_context(|| {
                format!("extension '{}' failed in take_measurements", extension.name())
            })?;
        }

        let mut positions = Vec::with_capacity(self.movements.len());
        for axis in &self.movements {
            let movement = &axis.movement;
            let position = movement
                .position()
                .await
                .with_context(|| format!("reading position of '{}'", movement.name()))?;
            positions.push((
                ColumnSpec::position_header(movement.position_column(), movement.position_units()),
                position,
            ));
        }

        for probe in &self.measurements {
            let name = probe.measurement.name();
            let mut data = probe
                .measurement
                .perform_measurement()
                .await
                .with_context(|| format!("measurement '{}' failed", name))?;
            for (header, position) in &positions {
                data.push_constant_column(header.clone(), *position);
            }
            self.save_data(&data, name).await?;
        }
        Ok(())
    }

    async fn save_data(&self, data: &birch_core::DataTable, measurement_name: &str) -> Result<()> {
        trace!(
            scan = %self.settings.scan_name,
            measurement = measurement_name,
            indices = ?self.cursor.indices,
            rows = data.num_rows(),
            "Saving data"
        );
        for extension in &self.extensions {
            extension
                .save_data(data, measurement_name)
                .await
                .with_context(|| format!("extension '{}' failed in save_data", extension.name()))?;
        }
        Ok(())
    }
}
