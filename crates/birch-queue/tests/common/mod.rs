#![allow(dead_code)]

use birch_driver_mock::{MockMeter, MockStage};
use birch_experiment::{MeasurementProbe, MovementAxis, Scan, ScanSettings, TableRecorder};
use birch_queue::ScanQueue;
use std::sync::Arc;
use std::time::Duration;

pub const WAIT: Option<Duration> = Some(Duration::from_secs(10));

pub struct Raster {
    pub x: Arc<MockStage>,
    pub y: Arc<MockStage>,
    pub meter: Arc<MockMeter>,
    pub recorder: TableRecorder,
    pub scan: Scan,
}

/// 3 x 2 raster with X varying fastest.
pub fn raster(name: &str, meter: MockMeter) -> Raster {
    let x = Arc::new(MockStage::new(format!("{name}_x")).with_column("X", "mm"));
    let y = Arc::new(MockStage::new(format!("{name}_y")).with_column("Y", "mm"));
    let meter = Arc::new(meter);
    let recorder = TableRecorder::new();

    let scan = Scan::new(ScanSettings::new("proj", name), "tester", "S001")
        .with_movement(MovementAxis::new(x.clone(), vec![10.0, 20.0, 30.0]).unwrap())
        .with_movement(MovementAxis::new(y.clone(), vec![0.0, 5.0]).unwrap())
        .with_measurement(MeasurementProbe::new(meter.clone()))
        .with_extension(Arc::new(recorder.clone()));

    Raster {
        x,
        y,
        meter,
        recorder,
        scan,
    }
}

/// Single-axis scan with `points` slow measurements.
pub fn slow_line(name: &str, points: usize, delay_ms: u64) -> (Scan, Arc<MockMeter>) {
    let stage = Arc::new(MockStage::new(format!("{name}_stage")));
    let meter = Arc::new(
        MockMeter::new(format!("{name}_meter")).with_delay(Duration::from_millis(delay_ms)),
    );
    let positions = (0..points).map(|p| p as f64).collect();
    let scan = Scan::new(ScanSettings::new("proj", name), "tester", "S001")
        .with_movement(MovementAxis::new(stage, positions).unwrap())
        .with_measurement(MeasurementProbe::new(meter.clone()));
    (scan, meter)
}

pub fn visited(recorder: &TableRecorder) -> Vec<(f64, f64)> {
    recorder
        .tables()
        .iter()
        .map(|t| {
            let x = t.table.column("X M(mm)").unwrap()[0];
            let y = t.table.column("Y M(mm)").unwrap()[0];
            (x, y)
        })
        .collect()
}

pub const FULL_RASTER: [(f64, f64); 6] = [
    (10.0, 0.0),
    (20.0, 0.0),
    (30.0, 0.0),
    (10.0, 5.0),
    (20.0, 5.0),
    (30.0, 5.0),
];

pub async fn run_to_idle(queue: &ScanQueue) {
    assert!(queue.wait_for_completion(WAIT).await, "queue did not finish");
}
