//! Tabular measurement data.
//!
//! Every measurement produces a [`DataTable`]: a list of named columns and rows
//! of `f64` values. The sweep executor appends one constant column per movement
//! axis before handing the table to the data sinks.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// A named data column with its unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Quantity name (e.g. "voltage").
    pub name: String,
    /// Unit (e.g. "V").
    pub unit: String,
}

impl ColumnSpec {
    /// Create a column description.
    pub fn new(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
        }
    }

    /// Header used in tables: `"<name> (<unit>)"`.
    pub fn header(&self) -> String {
        format!("{} ({})", self.name, self.unit)
    }

    /// Header of a position column appended by the sweep: `"<name> M(<unit>)"`.
    pub fn position_header(name: &str, unit: &str) -> String {
        format!("{} M({})", name, unit)
    }
}

/// Rows x named columns of readings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataTable {
    columns: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl DataTable {
    /// Create an empty table with the given headers.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Create an empty table whose headers come from column specs.
    pub fn from_specs(specs: &[ColumnSpec]) -> Self {
        Self::new(specs.iter().map(ColumnSpec::header).collect())
    }

    /// Append a row; it must have one value per column.
    pub fn push_row(&mut self, row: Vec<f64>) -> Result<()> {
        if row.len() != self.columns.len() {
            bail!(
                "Row has {} values but table has {} columns",
                row.len(),
                self.columns.len()
            );
        }
        self.rows.push(row);
        Ok(())
    }

    /// Append a column holding the same value in every row.
    pub fn push_constant_column(&mut self, header: impl Into<String>, value: f64) {
        self.columns.push(header.into());
        for row in &mut self.rows {
            row.push(value);
        }
    }

    /// Column headers.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Data rows.
    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Values of the column with the given header.
    pub fn column(&self, header: &str) -> Option<Vec<f64>> {
        let idx = self.columns.iter().position(|c| c == header)?;
        Some(self.rows.iter().map(|row| row[idx]).collect())
    }
}
