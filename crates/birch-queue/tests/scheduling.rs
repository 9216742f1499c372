//! Serial and parallel execution against mock instruments.

mod common;

use birch_core::BirchError;
use birch_driver_mock::MockMeter;
use birch_queue::{
    ExecutionMode, LogLevel, LogQuery, QueueOptions, QueueState, ScanQueue, ScanState,
    StartOutcome,
};
use common::{raster, run_to_idle, slow_line, visited, FULL_RASTER};
use std::sync::{Arc, Mutex};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn serial_runs_scans_one_after_another() {
    let queue = ScanQueue::new("serial");
    let a = raster("a", MockMeter::new("dmm_a"));
    let b = raster("b", MockMeter::new("dmm_b"));
    let started = Arc::new(Mutex::new(Vec::new()));
    let running = Arc::new(Mutex::new((0i32, 0i32)));
    {
        let started = started.clone();
        let running = running.clone();
        queue.add_state_callback(move |scan_id: &str, state: ScanState| {
            let mut count = running.lock().unwrap();
            if state == ScanState::Running {
                started.lock().unwrap().push(scan_id.to_string());
                count.0 += 1;
                count.1 = count.1.max(count.0);
            } else if state.is_terminal() {
                count.0 -= 1;
            }
        });
    }

    let ha = queue.enqueue(a.scan);
    let hb = queue.enqueue(b.scan);
    let outcome = queue.start(None, None).await.unwrap();
    assert_eq!(outcome, StartOutcome::Started { scans: 2 });
    run_to_idle(&queue).await;

    assert_eq!(ha.state(), ScanState::Completed);
    assert_eq!(hb.state(), ScanState::Completed);
    assert_eq!(ha.progress(), 1.0);
    assert!(ha.duration().is_some());
    assert_eq!(*started.lock().unwrap(), vec!["proj_a", "proj_b"]);
    assert_eq!(running.lock().unwrap().1, 1);
    assert_eq!(visited(&a.recorder), FULL_RASTER.to_vec());
    assert_eq!(visited(&b.recorder), FULL_RASTER.to_vec());

    let status = queue.status();
    assert_eq!(status.state, QueueState::Idle);
    assert_eq!(status.total_scans, 2);
    assert_eq!(status.count(ScanState::Completed), 2);
    assert_eq!(status.count(ScanState::Failed), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_respects_max_parallel_scans() {
    let queue = ScanQueue::with_options(
        QueueOptions::new("parallel")
            .with_execution_mode(ExecutionMode::Parallel)
            .with_max_parallel_scans(2),
    );
    let running = Arc::new(Mutex::new((0i32, 0i32)));
    {
        let running = running.clone();
        queue.add_state_callback(move |_: &str, state: ScanState| {
            let mut count = running.lock().unwrap();
            if state == ScanState::Running {
                count.0 += 1;
                count.1 = count.1.max(count.0);
            } else if state.is_terminal() {
                count.0 -= 1;
            }
        });
    }

    let mut meters = Vec::new();
    for name in ["p1", "p2", "p3"] {
        let (scan, meter) = slow_line(name, 3, 30);
        queue.enqueue(scan);
        meters.push(meter);
    }

    queue.start(None, None).await.unwrap();
    run_to_idle(&queue).await;

    assert_eq!(running.lock().unwrap().1, 2);
    assert_eq!(queue.status().count(ScanState::Completed), 3);
    assert!(meters.iter().all(|m| m.measurement_count() == 3));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_probe_marks_scan_failed_and_keeps_going() {
    let queue = ScanQueue::new("failing");
    let bad = raster("bad", MockMeter::new("dmm_bad").fail_on_call(4));
    let good = raster("good", MockMeter::new("dmm_good"));
    let hbad = queue.enqueue(bad.scan);
    let hgood = queue.enqueue(good.scan);

    queue.start(None, None).await.unwrap();
    run_to_idle(&queue).await;

    assert_eq!(hbad.state(), ScanState::Failed);
    assert!(hbad.error().is_some());
    assert_eq!(hbad.progress(), 1.0);
    assert_eq!(bad.meter.shutdown_count(), 1);
    assert_eq!(bad.x.shutdown_count(), 1);
    assert_eq!(hbad.with_scan(|s| s.cursor().master_index).await, Some(3));
    assert_eq!(hgood.state(), ScanState::Completed);

    let errors = queue.logs(&LogQuery::new().scan("proj_bad").level(LogLevel::Error));
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.starts_with("Scan failed"));
    assert!(errors[0].data.as_ref().unwrap().get("trace").is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_failure_does_not_fail_a_completed_scan() {
    let queue = ScanQueue::new("shutdown");
    let r = raster("sd", MockMeter::new("dmm").with_shutdown_failure());
    let handle = queue.enqueue(r.scan);

    queue.start(None, None).await.unwrap();
    run_to_idle(&queue).await;

    assert_eq!(handle.state(), ScanState::Completed);
    let errors = queue.logs(&LogQuery::new().level(LogLevel::Error));
    assert!(errors
        .iter()
        .any(|e| e.message.starts_with("Error during shutdown")));
}

#[tokio::test]
async fn start_without_queued_scans_stays_idle() {
    let queue = ScanQueue::new("empty");
    assert_eq!(queue.start(None, None).await.unwrap(), StartOutcome::NothingQueued);
    assert_eq!(queue.state(), QueueState::Idle);
    assert!(queue.wait_for_completion(None).await);

    let warnings = queue.logs(&LogQuery::new().level(LogLevel::Warning));
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].message, "No queued scans to execute");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn start_while_running_is_rejected() {
    let queue = ScanQueue::new("busy");
    let (scan, _) = slow_line("slow", 5, 20);
    queue.enqueue(scan);

    queue.start(None, None).await.unwrap();
    let again = queue.start(None, None).await;
    assert!(matches!(again, Err(BirchError::AlreadyRunning)));

    run_to_idle(&queue).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn start_with_indices_runs_only_selected_scans() {
    let queue = ScanQueue::new("subset");
    let first = queue.enqueue(raster("one", MockMeter::new("m1")).scan);
    let second = queue.enqueue(raster("two", MockMeter::new("m2")).scan);

    let outcome = queue
        .start(Some(&[1, 7]), Some(ExecutionMode::Parallel))
        .await
        .unwrap();
    assert_eq!(outcome, StartOutcome::Started { scans: 1 });
    run_to_idle(&queue).await;

    assert_eq!(first.state(), ScanState::Queued);
    assert_eq!(second.state(), ScanState::Completed);
    assert_eq!(queue.execution_mode(), ExecutionMode::Parallel);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn progress_is_reported_per_step() {
    let queue = ScanQueue::new("progress");
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        queue.add_progress_callback(move |_: &str, fraction: f64| {
            seen.lock().unwrap().push(fraction);
        });
    }
    queue.enqueue(raster("pr", MockMeter::new("dmm")).scan);

    queue.start(None, None).await.unwrap();
    run_to_idle(&queue).await;

    let seen = seen.lock().unwrap();
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(seen.last().copied(), Some(1.0));
    assert!((seen[0] - 1.0 / 6.0).abs() < 1e-9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn logs_can_be_filtered_by_scan() {
    let queue = ScanQueue::new("logs");
    queue.enqueue(raster("la", MockMeter::new("m1")).scan);
    queue.enqueue(raster("lb", MockMeter::new("m2")).scan);

    queue.start(None, None).await.unwrap();
    run_to_idle(&queue).await;

    let for_a = queue.logs(&LogQuery::new().scan("proj_la"));
    assert!(!for_a.is_empty());
    assert!(for_a.iter().all(|e| e.scan_id == "proj_la"));
    assert!(for_a.iter().any(|e| e.message == "Scan completed successfully"));

    let last_two = queue.logs(&LogQuery::new().limit(2));
    assert_eq!(last_two.len(), 2);
    assert_eq!(last_two[1].message, "Queue execution finished");

    queue.clear_logs();
    assert!(queue.logs(&LogQuery::new()).is_empty());
}
