//! Sweep executor behaviour against mock instruments.

use birch_core::ExecutionPhase;
use birch_driver_mock::{MockMeter, MockStage};
use birch_experiment::{
    CancellationToken, MeasurementProbe, MovementAxis, NeverInterrupt, Scan, ScanSettings,
    StepProgress, SweepOutcome, TableRecorder,
};
use std::sync::Arc;

struct Fixture {
    x: Arc<MockStage>,
    y: Arc<MockStage>,
    meter: Arc<MockMeter>,
    recorder: TableRecorder,
    scan: Scan,
}

fn raster(meter: MockMeter) -> Fixture {
    let x = Arc::new(MockStage::new("stage_x").with_column("X", "mm"));
    let y = Arc::new(MockStage::new("stage_y").with_column("Y", "mm"));
    let meter = Arc::new(meter);
    let recorder = TableRecorder::new();

    let scan = Scan::new(ScanSettings::new("proj", "raster"), "tester", "S001")
        .with_movement(MovementAxis::new(x.clone(), vec![10.0, 20.0, 30.0]).unwrap())
        .with_movement(MovementAxis::new(y.clone(), vec![0.0, 5.0]).unwrap())
        .with_measurement(MeasurementProbe::new(meter.clone()))
        .with_extension(Arc::new(recorder.clone()));

    Fixture {
        x,
        y,
        meter,
        recorder,
        scan,
    }
}

fn visited(recorder: &TableRecorder) -> Vec<(f64, f64)> {
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

const FULL_RASTER: [(f64, f64); 6] = [
    (10.0, 0.0),
    (20.0, 0.0),
    (30.0, 0.0),
    (10.0, 5.0),
    (20.0, 5.0),
    (30.0, 5.0),
];

#[tokio::test]
async fn visits_points_in_odometer_order() {
    let mut f = raster(MockMeter::new("dmm"));
    let mut steps = Vec::new();

    let outcome = f
        .scan
        .execute(&NeverInterrupt, &mut |p: StepProgress| steps.push(p.master_index()))
        .await
        .unwrap();

    assert_eq!(outcome, SweepOutcome::Completed);
    assert_eq!(visited(&f.recorder), FULL_RASTER.to_vec());
    assert_eq!(f.meter.measurement_count(), 6);
    assert_eq!(steps, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(f.scan.cursor().master_index, 6);
    assert_eq!(f.scan.progress(), 1.0);
}

#[tokio::test]
async fn only_changed_axes_move() {
    let mut f = raster(MockMeter::new("dmm"));
    f.scan.execute(&NeverInterrupt, &mut |_| {}).await.unwrap();

    assert_eq!(f.x.moves(), vec![10.0, 20.0, 30.0, 10.0, 20.0, 30.0]);
    assert_eq!(f.y.moves(), vec![0.0, 5.0]);
}

#[tokio::test]
async fn tables_carry_measurement_and_position_columns() {
    let mut f = raster(MockMeter::new("dmm").with_rows(2));
    f.scan.execute(&NeverInterrupt, &mut |_| {}).await.unwrap();

    let tables = f.recorder.tables_for("dmm");
    assert_eq!(tables.len(), 6);
    assert_eq!(
        tables[0].columns(),
        &["voltage (V)", "current (A)", "X M(mm)", "Y M(mm)"]
    );
    assert_eq!(tables[4].column("X M(mm)").unwrap(), vec![20.0, 20.0]);
}

#[tokio::test]
async fn scan_without_axes_measures_once() {
    let meter = Arc::new(MockMeter::new("dmm"));
    let recorder = TableRecorder::new();
    let mut scan = Scan::new(ScanSettings::new("proj", "single"), "tester", "S001")
        .with_measurement(MeasurementProbe::new(meter.clone()))
        .with_extension(Arc::new(recorder.clone()));

    let outcome = scan.execute(&NeverInterrupt, &mut |_| {}).await.unwrap();

    assert_eq!(outcome, SweepOutcome::Completed);
    assert_eq!(meter.measurement_count(), 1);
    assert_eq!(recorder.len(), 1);
    assert_eq!(scan.cursor().master_index, 1);
}

#[tokio::test]
async fn measurement_failure_keeps_committed_steps() {
    let mut f = raster(MockMeter::new("dmm").fail_on_call(4));

    let err = f
        .scan
        .execute(&NeverInterrupt, &mut |_| {})
        .await
        .unwrap_err();

    assert_eq!(err.phase(), Some(ExecutionPhase::Sweep));
    assert!(err.to_string().contains("dmm"));
    assert_eq!(f.scan.cursor().master_index, 3);
    assert_eq!(f.recorder.len(), 3);
}

#[tokio::test]
async fn interrupted_sweep_resumes_without_gaps_or_repeats() {
    let mut f = raster(MockMeter::new("dmm"));
    let token = CancellationToken::new("raster");

    let pauser = token.clone();
    let mut reported = None;
    let outcome = f
        .scan
        .execute(&token, &mut |p: StepProgress| {
            if p.master_index() == 2 {
                pauser.pause();
            }
            reported = Some(p.cursor);
        })
        .await
        .unwrap();

    assert_eq!(outcome, SweepOutcome::Interrupted);
    assert_eq!(f.scan.cursor().master_index, 2);
    assert_eq!(f.scan.cursor().indices, vec![2, 0]);
    assert_eq!(reported.as_ref(), Some(f.scan.cursor()));
    assert_eq!(f.recorder.len(), 2);

    token.resume();
    let outcome = f.scan.execute(&token, &mut |_| {}).await.unwrap();

    assert_eq!(outcome, SweepOutcome::Completed);
    assert_eq!(visited(&f.recorder), FULL_RASTER.to_vec());
    // every axis is moved again on the first step after re-entry
    assert_eq!(f.y.moves(), vec![0.0, 0.0, 5.0]);
}

#[tokio::test]
async fn completed_sweep_is_a_no_op() {
    let mut f = raster(MockMeter::new("dmm"));
    f.scan.execute(&NeverInterrupt, &mut |_| {}).await.unwrap();
    f.scan.execute(&NeverInterrupt, &mut |_| {}).await.unwrap();

    assert_eq!(f.meter.measurement_count(), 6);

    f.scan.reset();
    f.scan.execute(&NeverInterrupt, &mut |_| {}).await.unwrap();
    assert_eq!(f.meter.measurement_count(), 12);
}
