//! Capture jobs writing through to the CSV dataset

use emg_gesture_agent::capture::{header, CaptureJob, CaptureJobSpec, Dataset, LABEL_COLUMN};
use emg_gesture_agent::collector::{AcquisitionMode, Sample, ScriptedFeed, SensorFeed};
use emg_gesture_agent::{AgentError, CancelToken};
use std::time::Duration;

fn feeds(
    build: fn() -> ScriptedFeed,
) -> impl Fn(AcquisitionMode) -> Box<dyn SensorFeed> + Send + Sync {
    move |_mode| Box::new(build()) as Box<dyn SensorFeed>
}

fn job(label: usize) -> CaptureJob {
    CaptureJob::new(
        CaptureJobSpec::new(label, Duration::from_millis(100), AcquisitionMode::Preprocessed)
            .unwrap(),
    )
}

#[test]
fn test_header_layout() {
    let columns = header();
    assert_eq!(columns.len(), 9);
    assert_eq!(columns[0], "Channel_1");
    assert_eq!(columns[7], "Channel_8");
    assert_eq!(columns[8], LABEL_COLUMN);
}

#[test]
fn test_labels_accumulate_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = Dataset::new(dir.path().join("emg_dataset.csv"));
    let source = feeds(|| ScriptedFeed::repeating(Sample::splat(250), 20));
    let cancel = CancelToken::new();

    dataset.reset().unwrap();
    assert_eq!(job(0).run_and_flush(&source, &dataset, &cancel).unwrap(), 20);
    assert_eq!(job(4).run_and_flush(&source, &dataset, &cancel).unwrap(), 20);

    let rows = dataset.rows().unwrap();
    assert_eq!(rows.len(), 40);
    assert!(rows[..20].iter().all(|(_, label)| *label == 0));
    assert!(rows[20..].iter().all(|(_, label)| *label == 4));
    assert_eq!(rows[0].0, [250; 8]);
    assert_eq!(dataset.headers().unwrap(), header());
}

#[test]
fn test_append_to_missing_file_writes_header() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = Dataset::new(dir.path().join("fresh.csv"));
    assert!(!dataset.exists());
    assert_eq!(dataset.row_count().unwrap(), 0);

    let source = feeds(|| ScriptedFeed::repeating(Sample::splat(1), 5));
    job(2).run_and_flush(&source, &dataset, &CancelToken::new()).unwrap();

    assert_eq!(dataset.headers().unwrap(), header());
    assert_eq!(dataset.row_count().unwrap(), 5);
}

#[test]
fn test_device_loss_keeps_partial_capture() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = Dataset::new(dir.path().join("emg_dataset.csv"));
    let source = feeds(|| ScriptedFeed::repeating(Sample::splat(9), 50).fail_after(12));

    let result = job(1).run_and_flush(&source, &dataset, &CancelToken::new());
    assert!(matches!(result, Err(AgentError::DeviceError(_))));
    assert_eq!(dataset.row_count().unwrap(), 12);
}

#[test]
fn test_cancelled_capture_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = Dataset::new(dir.path().join("emg_dataset.csv"));
    let source = feeds(|| ScriptedFeed::repeating(Sample::splat(9), 50));
    let cancel = CancelToken::new();
    cancel.cancel();

    assert!(job(1).run_and_flush(&source, &dataset, &cancel).is_err());
    assert!(!dataset.exists());
}

#[test]
fn test_reset_truncates() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = Dataset::new(dir.path().join("emg_dataset.csv"));
    let source = feeds(|| ScriptedFeed::repeating(Sample::splat(3), 7));
    job(5).run_and_flush(&source, &dataset, &CancelToken::new()).unwrap();
    assert_eq!(dataset.row_count().unwrap(), 7);

    dataset.reset().unwrap();
    assert_eq!(dataset.row_count().unwrap(), 0);
    assert_eq!(dataset.headers().unwrap(), header());
}
