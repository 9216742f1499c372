//! Building and running a queue from configuration.

use birch::app::ScanResults;
use birch::{BirchConfig, Session};
use birch_core::BirchError;
use birch_queue::{ScanQueue, ScanState};
use figment::providers::{Format, Toml};
use figment::Figment;
use std::time::Duration;
use tempfile::tempdir;

const CONFIG: &str = r#"
[queue]
id = "session"
execution_mode = "parallel"
max_parallel_scans = 2

[[instruments]]
id = "stage_x"
type = "mock_stage"
config = { position_column = "X", units = "um" }

[[instruments]]
id = "stage_y"
type = "mock_stage"
config = { position_column = "Y", units = "um" }

[[instruments]]
id = "dmm"
type = "mock_meter"

[[instruments]]
id = "spare"
type = "mock_meter"
enabled = false

[[scans]]
project = "p"
name = "raster"

[[scans.movements]]
instrument = "stage_x"
start = 0.0
stop = 2.0
points = 3

[[scans.movements]]
instrument = "stage_y"
positions = [0.0, 1.0]

[[scans.measurements]]
instrument = "dmm"

[[scans]]
project = "p"
name = "line"

[[scans.movements]]
instrument = "stage_x"
positions = [5.0]

[[scans.measurements]]
instrument = "dmm"
"#;

fn config() -> BirchConfig {
    Figment::new().merge(Toml::string(CONFIG)).extract().unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn configured_scans_run_and_record_data() {
    let session = Session::from_config(&config()).unwrap();
    let queue = session.queue();
    assert_eq!(queue.size(), 2);
    assert_eq!(session.instrument_count(), 3);

    queue.start(None, None).await.unwrap();
    assert!(queue.wait_for_completion(Some(Duration::from_secs(10))).await);
    assert_eq!(queue.status().count(ScanState::Completed), 2);

    let results = session.results();
    assert_eq!(results[0].scan_id, "p_raster");
    assert_eq!(results[0].tables.len(), 6);
    assert_eq!(results[1].tables.len(), 1);
    let columns = results[0].tables[0].table.columns();
    assert!(columns.contains(&"X M(um)".to_string()));
    assert!(columns.contains(&"Y M(um)".to_string()));

    let dir = tempdir().unwrap();
    let path = dir.path().join("results.json");
    session.write_results(&path).unwrap();
    let written: Vec<ScanResults> =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written, results);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn snapshot_can_be_rerun_against_configured_instruments() {
    let first = Session::from_config(&config()).unwrap();
    let dir = tempdir().unwrap();
    let path = dir.path().join("queue.json");
    first.queue().save(&path).unwrap();

    let snapshot = ScanQueue::load_snapshot(&path).unwrap();
    let summary = birch::describe_snapshot(&snapshot);
    assert!(summary.contains("p_raster"));
    assert!(summary.contains("6 points"));

    let second = Session::from_snapshot(&config(), &snapshot).unwrap();
    assert_eq!(second.queue().id(), "session");
    second.queue().start(None, None).await.unwrap();
    assert!(second
        .queue()
        .wait_for_completion(Some(Duration::from_secs(10)))
        .await);
    assert_eq!(second.results()[0].tables.len(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn completed_scans_are_not_measured_again_after_resume() {
    let first = Session::from_config(&config()).unwrap();
    first.queue().start(None, None).await.unwrap();
    assert!(first
        .queue()
        .wait_for_completion(Some(Duration::from_secs(10)))
        .await);
    let snapshot = first.queue().snapshot();
    assert_eq!(snapshot.scans[0].cursor.master_index, 6);

    let second = Session::from_snapshot(&config(), &snapshot).unwrap();
    second.queue().start(None, None).await.unwrap();
    assert!(second
        .queue()
        .wait_for_completion(Some(Duration::from_secs(10)))
        .await);
    assert_eq!(second.queue().status().count(ScanState::Completed), 2);
    assert!(second.results().iter().all(|r| r.tables.is_empty()));
}

#[test]
fn axes_sharing_a_position_column_are_rejected() {
    let mut config = config();
    config.scans[0].movements[1].instrument = "stage_x".to_string();
    assert!(matches!(
        Session::from_config(&config),
        Err(BirchError::InvalidAxis(_))
    ));
}

#[test]
fn disabled_instrument_cannot_be_used() {
    let mut config = config();
    config.scans[1].measurements[0].instrument = "spare".to_string();
    assert!(matches!(
        Session::from_config(&config),
        Err(BirchError::Configuration(_))
    ));
}
