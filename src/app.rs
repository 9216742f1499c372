//! Builds a runnable queue from configuration.
//!
//! A [`Session`] owns the queue, the instruments created from the
//! `[[instruments]]` section and one [`TableRecorder`] per scan, so the data
//! recorded during a run can be exported afterwards.

use birch_core::{AppResult, BirchError, DataTable};
use birch_driver_mock::MockInstrument;
use birch_experiment::{MeasurementProbe, MovementAxis, Scan, TableRecorder};
use birch_queue::{QueueSnapshot, ScanQueue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{BirchConfig, ScanDefinition};

/// Data recorded by one scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResults {
    /// Scan id.
    pub scan_id: String,
    /// Saved tables in save order.
    pub tables: Vec<MeasurementTable>,
}

/// One saved table and the instrument that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementTable {
    /// Measurement instrument name.
    pub measurement: String,
    /// Table including position columns.
    pub table: DataTable,
}

/// A queue built from configuration plus what is needed to export its data.
pub struct Session {
    queue: ScanQueue,
    instruments: HashMap<String, MockInstrument>,
    recorders: Vec<(String, TableRecorder)>,
}

impl Session {
    /// Validate `config`, build its instruments and enqueue its scans.
    pub fn from_config(config: &BirchConfig) -> AppResult<Self> {
        config.validate()?;
        let instruments = build_instruments(config)?;
        let mut recorders = Vec::new();

        let queue = ScanQueue::with_options(config.queue.clone());
        for def in &config.scans {
            queue.enqueue(build_scan(&instruments, &mut recorders, def)?);
        }

        info!(
            queue_id = %queue.id(),
            scans = queue.size(),
            instruments = instruments.len(),
            "Session ready"
        );
        Ok(Self {
            queue,
            instruments,
            recorders,
        })
    }

    /// Rebuild a snapshot's queue, pairing its scans with the configured instruments.
    ///
    /// Each scan continues from its recorded cursor. The `[[scans]]` section
    /// of `config` is ignored.
    pub fn from_snapshot(config: &BirchConfig, snapshot: &QueueSnapshot) -> AppResult<Self> {
        config.validate()?;
        let instruments = build_instruments(config)?;
        let mut recorders = Vec::new();

        let queue = ScanQueue::restore_with(snapshot, |record| {
            build_scan(&instruments, &mut recorders, &ScanDefinition::from_record(record))
        })?;

        Ok(Self {
            queue,
            instruments,
            recorders,
        })
    }

    /// The queue.
    pub fn queue(&self) -> &ScanQueue {
        &self.queue
    }

    /// Data recorded so far, per scan in enqueue order.
    pub fn results(&self) -> Vec<ScanResults> {
        self.recorders
            .iter()
            .map(|(scan_id, recorder)| ScanResults {
                scan_id: scan_id.clone(),
                tables: recorder
                    .tables()
                    .into_iter()
                    .map(|t| MeasurementTable {
                        measurement: t.measurement,
                        table: t.table,
                    })
                    .collect(),
            })
            .collect()
    }

    /// Write [`Session::results`] as pretty JSON.
    pub fn write_results(&self, path: impl AsRef<Path>) -> AppResult<()> {
        let path = path.as_ref();
        let results = self.results();
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &results)?;
        writer.flush()?;
        info!(
            path = %path.display(),
            tables = results.iter().map(|r| r.tables.len()).sum::<usize>(),
            "Results written"
        );
        Ok(())
    }

    /// Number of instruments built from configuration.
    pub fn instrument_count(&self) -> usize {
        self.instruments.len()
    }
}

fn build_instruments(config: &BirchConfig) -> AppResult<HashMap<String, MockInstrument>> {
    let mut instruments = HashMap::new();
    for def in &config.instruments {
        if !def.enabled {
            debug!(instrument = %def.id, "Instrument disabled, skipped");
            continue;
        }
        let instrument = birch_driver_mock::build(&def.r#type, &def.id, def.config.clone())
            .map_err(|e| BirchError::Configuration(format!("instrument '{}': {e:#}", def.id)))?;
        debug!(instrument = %def.id, kind = %def.r#type, "Instrument created");
        instruments.insert(def.id.clone(), instrument);
    }
    Ok(instruments)
}

fn build_scan(
    instruments: &HashMap<String, MockInstrument>,
    recorders: &mut Vec<(String, TableRecorder)>,
    def: &ScanDefinition,
) -> AppResult<Scan> {
    let recorder = TableRecorder::new();
    let mut scan = Scan::new(def.settings(), &def.owner, &def.sample_id)
        .with_extension(Arc::new(recorder.clone()));

    for axis in &def.movements {
        let stage = match instruments.get(&axis.instrument) {
            Some(MockInstrument::Stage(stage)) => stage.clone(),
            _ => {
                return Err(BirchError::Configuration(format!(
                    "'{}' is not an enabled movement instrument",
                    axis.instrument
                )))
            }
        };
        let positions = axis.resolve_positions()?;
        scan = scan.with_movement(
            MovementAxis::new(stage, positions)?.with_settings(axis.settings.clone()),
        );
    }

    for probe in &def.measurements {
        let meter = match instruments.get(&probe.instrument) {
            Some(MockInstrument::Meter(meter)) => meter.clone(),
            _ => {
                return Err(BirchError::Configuration(format!(
                    "'{}' is not an enabled measurement instrument",
                    probe.instrument
                )))
            }
        };
        scan = scan
            .with_measurement(MeasurementProbe::new(meter).with_settings(probe.settings.clone()));
    }

    scan.check_position_columns()?;
    if def.measurements.is_empty() {
        warn!(scan_id = %def.scan_id(), "Scan has no measurements");
    }
    recorders.push((def.scan_id(), recorder));
    Ok(scan)
}

/// One-line-per-scan summary of a snapshot.
pub fn describe_snapshot(snapshot: &QueueSnapshot) -> String {
    let mut out = format!(
        "Queue {} ({}, max {} parallel): {} scans\n",
        snapshot.queue_id,
        snapshot.execution_mode,
        snapshot.max_parallel_scans,
        snapshot.scans.len()
    );
    for (index, record) in snapshot.scans.iter().enumerate() {
        let points: usize = record
            .scan
            .movements
            .iter()
            .map(|axis| axis.positions.len())
            .product();
        out.push_str(&format!(
            "  [{index}] {:<32} {:<9} {:>5.1}%  {} points, {} probes\n",
            record.id,
            record.state.as_str(),
            record.progress * 100.0,
            points,
            record.scan.measurements.len()
        ));
    }
    out
}
