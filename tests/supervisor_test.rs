//! Deadline, retry and probe supervision against real worker threads

use emg_gesture_agent::collector::{AcquisitionMode, FeedFactory, ScriptedFeed, SensorFeed};
use emg_gesture_agent::supervisor::{
    ConnectivitySupervisor, JobRetrySupervisor, JobStatus, ThreadWorker, Worker, WorkerSpawner,
};
use emg_gesture_agent::{AgentError, CancelToken};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn hang(cancel: &CancelToken) -> Result<(), AgentError> {
    cancel.sleep(Duration::from_secs(3600));
    Err(AgentError::Worker("cancelled".to_string()))
}

#[test]
fn test_hung_job_is_terminated_on_every_attempt() {
    let supervisor = JobRetrySupervisor::new(Duration::ZERO);
    let launches = AtomicU32::new(0);

    let start = Instant::now();
    let report = supervisor.execute(
        "capture",
        |_attempt| {
            launches.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ThreadWorker::spawn("capture", hang)?) as Box<dyn Worker<()>>)
        },
        Duration::from_secs(1),
        3,
    );
    let elapsed = start.elapsed();

    assert_eq!(report.status, JobStatus::TimedOutExhausted);
    assert_eq!(report.attempts, 3);
    assert_eq!(report.terminations, 3);
    assert_eq!(launches.load(Ordering::SeqCst), 3);
    assert!(elapsed >= Duration::from_secs(3));
    assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");

    match report.into_result() {
        Err(AgentError::TimedOutExhausted { attempts, deadline }) => {
            assert_eq!(attempts, 3);
            assert_eq!(deadline, Duration::from_secs(1));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_second_attempt_succeeds_after_hang() {
    let supervisor = JobRetrySupervisor::new(Duration::from_millis(20));

    let report = supervisor.execute(
        "capture",
        |attempt| {
            let worker = if attempt == 1 {
                ThreadWorker::spawn("capture", |cancel: &CancelToken| {
                    cancel.sleep(Duration::from_secs(3600));
                    Ok(0usize)
                })?
            } else {
                ThreadWorker::spawn("capture", |_cancel: &CancelToken| Ok(42usize))?
            };
            Ok(Box::new(worker) as Box<dyn Worker<usize>>)
        },
        Duration::from_millis(200),
        3,
    );

    assert_eq!(report.status, JobStatus::Completed(42));
    assert_eq!(report.attempts, 2);
    assert_eq!(report.terminations, 1);
}

fn connectivity(build: fn() -> ScriptedFeed) -> ConnectivitySupervisor {
    let feeds: Arc<dyn FeedFactory> =
        Arc::new(move |_mode: AcquisitionMode| -> Box<dyn SensorFeed> { Box::new(build()) });
    let retry = JobRetrySupervisor::new(Duration::ZERO);
    ConnectivitySupervisor::new(feeds, WorkerSpawner::Thread, retry)
        .with_power_off_settle(Duration::from_millis(10))
}

#[test]
fn test_probe_of_responsive_device() {
    let supervisor = connectivity(|| {
        ScriptedFeed::new(Vec::new())
            .with_connect_delay(Duration::from_millis(100))
            .with_disconnect_delay(Duration::from_millis(100))
    });

    let start = Instant::now();
    assert!(supervisor.probe(Duration::from_secs(10)));
    assert!(start.elapsed() < Duration::from_millis(500));
}

#[test]
fn test_probe_of_silent_device_times_out() {
    let supervisor = connectivity(|| {
        ScriptedFeed::new(Vec::new()).with_connect_delay(Duration::from_secs(2))
    });

    let start = Instant::now();
    assert!(!supervisor.probe(Duration::from_millis(200)));
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_probe_of_refusing_device() {
    let supervisor = connectivity(|| ScriptedFeed::new(Vec::new()).fail_connect());
    assert!(!supervisor.probe(Duration::from_secs(1)));
}

#[test]
fn test_power_off_of_responsive_device() {
    let supervisor = connectivity(|| ScriptedFeed::new(Vec::new()));
    assert!(supervisor.power_off(Duration::from_secs(2)));
}
