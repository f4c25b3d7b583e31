//! Control operations over the pipeline, capture jobs and probes.
//!
//! The orchestrator is what the CLI and the HTTP surface call into. It owns
//! the single device-session slot shared by the real-time pipeline and
//! capture jobs, so at most one of them holds the armband at a time.
//! Probes and power-off use their own handles and ignore the slot.

use crate::cancel::{ActivationSlot, CancelToken};
use crate::capture::{CaptureJob, CaptureJobSpec, Dataset};
use crate::collector::{FeedFactory, SimulatedFeedConfig, SimulatedFeedFactory};
use crate::config::{Config, IsolationMode};
use crate::core::classifier::{ClassifierProvider, ModelFile, LABEL_COUNT};
use crate::core::pipeline::{ClassificationPipeline, PipelineReport, PipelineState};
use crate::error::AgentError;
use crate::metadata;
use crate::notify::{sink_from_config, ResultSink};
use crate::stats::{create_shared_stats_with_persistence, SharedSessionStats};
use crate::supervisor::{
    ConnectivitySupervisor, JobRetrySupervisor, JobStatus, WorkerProgram, WorkerSpawner,
    WorkerTask,
};
use crossbeam_channel::bounded;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Which dataset and model files are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactStatus {
    pub dataset: bool,
    pub model: bool,
}

/// Outcome of a toggle request.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeToggle {
    Started,
    Stopped(PipelineReport),
}

/// Records written per label during a full collection cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelCount {
    pub label: usize,
    pub records: usize,
}

/// Result of [`Orchestrator::collect_all`].
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionReport {
    pub completed: Vec<LabelCount>,
    /// The label that failed and why; later labels were not attempted.
    pub failure: Option<(usize, AgentError)>,
}

impl CollectionReport {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none() && self.completed.len() == LABEL_COUNT
    }

    pub fn total_records(&self) -> usize {
        self.completed.iter().map(|c| c.records).sum()
    }
}

struct RealtimeHandle {
    cancel: CancelToken,
    state: Arc<Mutex<PipelineState>>,
    thread: thread::JoinHandle<Result<PipelineReport, AgentError>>,
}

impl RealtimeHandle {
    fn state(&self) -> PipelineState {
        self.state.lock().map(|s| *s).unwrap_or(PipelineState::Error)
    }

    fn is_live(&self) -> bool {
        !self.thread.is_finished()
    }

    fn stop(self) -> Result<PipelineReport, AgentError> {
        self.cancel.cancel();
        self.thread
            .join()
            .map_err(|_| AgentError::Worker("real-time pipeline thread panicked".to_string()))?
    }
}

/// Entry point for every control operation.
pub struct Orchestrator {
    config: Config,
    feeds: Arc<dyn FeedFactory>,
    classifiers: Arc<dyn ClassifierProvider>,
    sink: Arc<dyn ResultSink>,
    stats: SharedSessionStats,
    device_slot: ActivationSlot,
    spawner: WorkerSpawner,
    retry: JobRetrySupervisor,
    connectivity: ConnectivitySupervisor,
    dataset: Dataset,
    dataset_lock: Mutex<()>,
    realtime: Mutex<Option<RealtimeHandle>>,
}

impl Orchestrator {
    pub fn builder(config: Config) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> &SharedSessionStats {
        &self.stats
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Start real-time classification in the background.
    ///
    /// Returns once the device is connected and streaming, or with the
    /// connect failure.
    pub fn start_pipeline(&self) -> Result<(), AgentError> {
        let mut realtime = self
            .realtime
            .lock()
            .map_err(|_| AgentError::Worker("real-time state poisoned".to_string()))?;

        if let Some(handle) = realtime.take() {
            if handle.is_live() {
                *realtime = Some(handle);
                return Err(AgentError::AlreadyRunning("real-time pipeline"));
            }
            // Reap a run that ended on its own.
            if let Err(e) = handle.stop() {
                tracing::debug!(error = %e, "previous real-time run had failed");
            }
        }

        let classifier = self.classifiers.load()?;
        let pipeline = ClassificationPipeline::new(
            self.config.pipeline.clone(),
            self.feeds.clone(),
            classifier,
            self.sink.clone(),
            self.stats.clone(),
            self.device_slot.clone(),
        );
        let state = pipeline.state_handle();
        let cancel = CancelToken::new();
        let (ready_tx, ready_rx) = bounded(1);

        let token = cancel.clone();
        let thread = thread::Builder::new()
            .name("emg-realtime".to_string())
            .spawn(move || pipeline.start_with(&token, Some(ready_tx)))
            .map_err(|e| AgentError::Worker(format!("failed to spawn pipeline thread: {e}")))?;

        let handle = RealtimeHandle {
            cancel,
            state,
            thread,
        };
        match ready_rx.recv() {
            Ok(Ok(())) => {
                *realtime = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.stop();
                Err(e)
            }
            Err(_) => Err(handle.stop().err().unwrap_or_else(|| {
                AgentError::Worker("pipeline exited before reporting readiness".to_string())
            })),
        }
    }

    /// Stop the running pipeline and release the device.
    pub fn stop_pipeline(&self) -> Result<PipelineReport, AgentError> {
        let handle = self
            .realtime
            .lock()
            .map_err(|_| AgentError::Worker("real-time state poisoned".to_string()))?
            .take()
            .ok_or(AgentError::NotRunning("real-time pipeline"))?;

        let report = handle.stop()?;
        if let Err(e) = self.stats.save() {
            tracing::warn!(error = %e, "could not save session statistics");
        }
        Ok(report)
    }

    /// Start when stopped, stop when running.
    pub fn toggle_realtime(&self) -> Result<RealtimeToggle, AgentError> {
        if self.is_pipeline_running() {
            Ok(RealtimeToggle::Stopped(self.stop_pipeline()?))
        } else {
            self.start_pipeline().map(|()| RealtimeToggle::Started)
        }
    }

    pub fn is_pipeline_running(&self) -> bool {
        self.realtime
            .lock()
            .map(|r| r.as_ref().is_some_and(RealtimeHandle::is_live))
            .unwrap_or(false)
    }

    pub fn pipeline_state(&self) -> PipelineState {
        self.realtime
            .lock()
            .ok()
            .and_then(|r| r.as_ref().map(RealtimeHandle::state))
            .unwrap_or(PipelineState::Idle)
    }

    /// Record `label` for `duration` (the configured default when `None`)
    /// under deadline supervision. Label 0 starts a fresh dataset.
    ///
    /// Returns the number of records written.
    pub fn run_capture_job(
        &self,
        label: usize,
        duration: Option<Duration>,
    ) -> Result<usize, AgentError> {
        let spec = CaptureJobSpec::new(
            label,
            duration.unwrap_or(self.config.capture.default_duration),
            self.config.capture.mode,
        )?;

        let Some(_device) = self.device_slot.try_acquire() else {
            return Err(AgentError::AlreadyRunning(self.device_slot.name()));
        };
        let _writer = self
            .dataset_lock
            .lock()
            .map_err(|_| AgentError::Worker("dataset lock poisoned".to_string()))?;

        let deadline = spec.duration + self.config.capture.deadline_grace;
        let report = self.retry.execute(
            "capture",
            |attempt| {
                if spec.starts_cycle() {
                    self.dataset.reset()?;
                }
                tracing::debug!(label = spec.label, attempt, "launching capture worker");
                let job = CaptureJob::new(spec.clone());
                let feeds = self.feeds.clone();
                let dataset = self.dataset.clone();
                self.spawner.spawn(&WorkerTask::Capture(spec.clone()), move |cancel| {
                    job.run_and_flush(feeds.as_ref(), &dataset, cancel)
                })
            },
            deadline,
            self.config.capture.max_attempts,
        );

        match &report.status {
            JobStatus::Completed(records) => {
                self.stats.record_capture_completed(*records as u64);
                tracing::info!(label, records, attempts = report.attempts, "capture job completed");
            }
            JobStatus::TimedOutExhausted => self.stats.record_capture_timed_out(),
            JobStatus::Failed(e) => tracing::warn!(label, error = %e, "capture job failed"),
        }
        if let Err(e) = self.stats.save() {
            tracing::warn!(error = %e, "could not save session statistics");
        }
        report.into_result()
    }

    /// Capture every label in order, stopping at the first failure.
    pub fn collect_all(&self, duration: Option<Duration>) -> CollectionReport {
        let mut completed = Vec::with_capacity(LABEL_COUNT);
        for label in 0..LABEL_COUNT {
            tracing::info!(label, gesture = crate::core::label_name(label), "collecting label");
            match self.run_capture_job(label, duration) {
                Ok(records) => completed.push(LabelCount { label, records }),
                Err(e) => {
                    return CollectionReport {
                        completed,
                        failure: Some((label, e)),
                    }
                }
            }
        }
        CollectionReport {
            completed,
            failure: None,
        }
    }

    /// Whether the device answers a connect/disconnect cycle within
    /// `timeout` (the configured probe timeout when `None`).
    pub fn probe_connectivity(&self, timeout: Option<Duration>) -> bool {
        let reachable = self
            .connectivity
            .probe(timeout.unwrap_or(self.config.probe_timeout));
        self.stats.record_probe(reachable);
        reachable
    }

    pub fn power_off_device(&self, timeout: Option<Duration>) -> bool {
        self.connectivity
            .power_off(timeout.unwrap_or(self.config.power_off_timeout))
    }

    /// Truncate the dataset and rewrite its header.
    pub fn reset_dataset(&self) -> Result<(), AgentError> {
        let _writer = self
            .dataset_lock
            .try_lock()
            .map_err(|_| AgentError::AlreadyRunning("capture job"))?;
        self.dataset.reset()
    }

    pub fn last_accuracy(&self) -> Result<Option<f64>, AgentError> {
        metadata::last_accuracy(&self.config.metadata_path())
    }

    pub fn check_artifacts(&self) -> ArtifactStatus {
        ArtifactStatus {
            dataset: self.dataset.exists(),
            model: self.config.model_path().exists(),
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Ok(realtime) = self.realtime.get_mut() {
            if let Some(handle) = realtime.take() {
                let _ = handle.stop();
            }
        }
    }
}

/// Assembles an [`Orchestrator`], filling unset collaborators from config.
pub struct OrchestratorBuilder {
    config: Config,
    feeds: Option<Arc<dyn FeedFactory>>,
    classifiers: Option<Arc<dyn ClassifierProvider>>,
    sink: Option<Arc<dyn ResultSink>>,
    stats: Option<SharedSessionStats>,
    spawner: Option<WorkerSpawner>,
    power_off_settle: Option<Duration>,
}

impl OrchestratorBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            feeds: None,
            classifiers: None,
            sink: None,
            stats: None,
            spawner: None,
            power_off_settle: None,
        }
    }

    pub fn feeds(mut self, feeds: Arc<dyn FeedFactory>) -> Self {
        self.feeds = Some(feeds);
        self
    }

    pub fn classifiers(mut self, classifiers: Arc<dyn ClassifierProvider>) -> Self {
        self.classifiers = Some(classifiers);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn stats(mut self, stats: SharedSessionStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn spawner(mut self, spawner: WorkerSpawner) -> Self {
        self.spawner = Some(spawner);
        self
    }

    pub fn power_off_settle(mut self, settle: Duration) -> Self {
        self.power_off_settle = Some(settle);
        self
    }

    pub fn build(self) -> Result<Orchestrator, AgentError> {
        let config = self.config;

        let feeds = self
            .feeds
            .unwrap_or_else(|| Arc::new(SimulatedFeedFactory::new(SimulatedFeedConfig::default())));
        let classifiers = self
            .classifiers
            .unwrap_or_else(|| Arc::new(ModelFile::new(config.model_path())));
        let sink = match self.sink {
            Some(sink) => sink,
            None => Arc::from(sink_from_config(config.notifier.as_ref())?),
        };
        let stats = self
            .stats
            .unwrap_or_else(|| create_shared_stats_with_persistence(config.stats_path()));
        let spawner = match self.spawner {
            Some(spawner) => spawner,
            None => match config.isolation {
                IsolationMode::Thread => WorkerSpawner::Thread,
                IsolationMode::Process => {
                    WorkerSpawner::Process(WorkerProgram::current(&config.data_path)?)
                }
            },
        };

        let retry = JobRetrySupervisor::new(config.settle_delay);
        let mut connectivity =
            ConnectivitySupervisor::new(feeds.clone(), spawner.clone(), retry.clone());
        if let Some(settle) = self.power_off_settle {
            connectivity = connectivity.with_power_off_settle(settle);
        }

        Ok(Orchestrator {
            dataset: Dataset::new(config.dataset_path()),
            config,
            feeds,
            classifiers,
            sink,
            stats,
            device_slot: ActivationSlot::new("device session"),
            spawner,
            retry,
            connectivity,
            dataset_lock: Mutex::new(()),
            realtime: Mutex::new(None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{AcquisitionMode, Sample, ScriptedFeed, SensorFeed};
    use crate::core::classifier::{FixedClassifier, Preloaded};
    use crate::notify::RecordingSink;
    use crate::stats::create_shared_stats;
    use std::time::Instant;

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config {
            data_path: dir.to_path_buf(),
            settle_delay: Duration::ZERO,
            ..Config::default()
        };
        config.pipeline.dispatch_delay = Duration::ZERO;
        config.capture.default_duration = Duration::from_millis(50);
        config.capture.deadline_grace = Duration::from_secs(2);
        config
    }

    fn streaming_feeds() -> Arc<dyn FeedFactory> {
        Arc::new(|_mode: AcquisitionMode| -> Box<dyn SensorFeed> {
            Box::new(
                ScriptedFeed::repeating(Sample::splat(300), 40).with_idle(Duration::from_millis(2)),
            )
        })
    }

    fn certain() -> Arc<dyn ClassifierProvider> {
        let classifier = FixedClassifier::new(vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        Arc::new(Preloaded(Arc::new(classifier)))
    }

    fn orchestrator(dir: &std::path::Path, feeds: Arc<dyn FeedFactory>) -> Orchestrator {
        let classifier = Arc::new(FixedClassifier::new(vec![0.9, 0.02, 0.02, 0.02, 0.02, 0.02]));
        Orchestrator::builder(test_config(dir))
            .feeds(feeds)
            .classifiers(Arc::new(Preloaded(classifier)))
            .sink(Arc::new(RecordingSink::default()))
            .stats(create_shared_stats())
            .spawner(WorkerSpawner::Thread)
            .power_off_settle(Duration::from_millis(10))
            .build()
            .unwrap()
    }

    #[test]
    fn test_start_and_stop_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), streaming_feeds());

        assert_eq!(orch.pipeline_state(), PipelineState::Idle);
        orch.start_pipeline().unwrap();
        assert!(orch.is_pipeline_running());
        assert_eq!(orch.pipeline_state(), PipelineState::Streaming);

        assert!(matches!(orch.start_pipeline(), Err(AgentError::AlreadyRunning(_))));

        let report = orch.stop_pipeline().unwrap();
        assert!(report.samples_received <= 40);
        assert!(!orch.is_pipeline_running());
        assert!(matches!(orch.stop_pipeline(), Err(AgentError::NotRunning(_))));
    }

    #[test]
    fn test_toggle_realtime() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), streaming_feeds());

        assert_eq!(orch.toggle_realtime().unwrap(), RealtimeToggle::Started);
        assert!(matches!(orch.toggle_realtime().unwrap(), RealtimeToggle::Stopped(_)));
        assert_eq!(orch.toggle_realtime().unwrap(), RealtimeToggle::Started);
    }

    #[test]
    fn test_start_pipeline_reports_unavailable_device() {
        let dir = tempfile::tempdir().unwrap();
        let feeds: Arc<dyn FeedFactory> = Arc::new(|_mode: AcquisitionMode| -> Box<dyn SensorFeed> {
            Box::new(ScriptedFeed::new(Vec::new()).fail_connect())
        });
        let orch = orchestrator(dir.path(), feeds);

        assert!(matches!(orch.start_pipeline(), Err(AgentError::DeviceUnavailable(_))));
        assert!(!orch.is_pipeline_running());
    }

    #[test]
    fn test_capture_rejected_while_pipeline_streams() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), streaming_feeds());

        orch.start_pipeline().unwrap();
        assert!(matches!(
            orch.run_capture_job(1, None),
            Err(AgentError::AlreadyRunning(_))
        ));
        orch.stop_pipeline().unwrap();
        assert!(orch.run_capture_job(1, None).is_ok());
    }

    #[test]
    fn test_label_zero_resets_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), streaming_feeds());

        assert_eq!(orch.run_capture_job(1, None).unwrap(), 40);
        assert_eq!(orch.run_capture_job(2, None).unwrap(), 40);
        assert_eq!(orch.dataset().row_count().unwrap(), 80);

        assert_eq!(orch.run_capture_job(0, None).unwrap(), 40);
        assert_eq!(orch.dataset().row_count().unwrap(), 40);
        assert_eq!(orch.stats().stats().capture_jobs_completed, 3);
    }

    #[test]
    fn test_invalid_capture_label() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), streaming_feeds());
        assert!(matches!(orch.run_capture_job(6, None), Err(AgentError::InvalidJob(_))));
    }

    #[test]
    fn test_collect_all_labels() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), streaming_feeds());

        let report = orch.collect_all(None);
        assert!(report.is_complete());
        assert_eq!(report.total_records(), 40 * LABEL_COUNT);
        let rows = orch.dataset().rows().unwrap();
        assert_eq!(rows.first().map(|r| r.1), Some(0));
        assert_eq!(rows.last().map(|r| r.1), Some(LABEL_COUNT - 1));
    }

    #[test]
    fn test_collect_all_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let opened = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = opened.clone();
        let feeds: Arc<dyn FeedFactory> =
            Arc::new(move |_mode: AcquisitionMode| -> Box<dyn SensorFeed> {
                let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if n < 2 {
                    Box::new(ScriptedFeed::repeating(Sample::splat(1), 5))
                } else {
                    Box::new(ScriptedFeed::new(Vec::new()).fail_connect())
                }
            });
        let orch = orchestrator(dir.path(), feeds);

        let report = orch.collect_all(None);
        assert_eq!(report.completed.len(), 2);
        assert!(matches!(report.failure, Some((2, AgentError::DeviceUnavailable(_)))));
    }

    #[test]
    fn test_capture_deadline_exhaustion() {
        let dir = tempfile::tempdir().unwrap();
        let feeds: Arc<dyn FeedFactory> = Arc::new(|_mode: AcquisitionMode| -> Box<dyn SensorFeed> {
            Box::new(ScriptedFeed::new(Vec::new()).with_connect_delay(Duration::from_secs(1)))
        });
        let mut config = test_config(dir.path());
        config.capture.deadline_grace = Duration::from_millis(50);
        config.capture.max_attempts = 2;
        let orch = Orchestrator::builder(config)
            .feeds(feeds)
            .classifiers(certain())
            .sink(Arc::new(RecordingSink::default()))
            .stats(create_shared_stats())
            .spawner(WorkerSpawner::Thread)
            .build()
            .unwrap();

        let start = Instant::now();
        let result = orch.run_capture_job(3, None);
        assert!(matches!(result, Err(AgentError::TimedOutExhausted { attempts: 2, .. })));
        assert!(start.elapsed() < Duration::from_secs(3));
        assert_eq!(orch.stats().stats().capture_jobs_timed_out, 1);
    }

    #[test]
    fn test_late_attempt_does_not_write_after_retry() {
        let dir = tempfile::tempdir().unwrap();
        let opened = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = opened.clone();
        let feeds: Arc<dyn FeedFactory> =
            Arc::new(move |_mode: AcquisitionMode| -> Box<dyn SensorFeed> {
                let feed = ScriptedFeed::repeating(Sample::splat(5), 40);
                if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                    // Finishes recording, then hangs in disconnect past the deadline.
                    Box::new(feed.with_disconnect_delay(Duration::from_millis(800)))
                } else {
                    Box::new(feed)
                }
            });
        let mut config = test_config(dir.path());
        config.capture.default_duration = Duration::from_millis(50);
        config.capture.deadline_grace = Duration::from_millis(100);
        let orch = Orchestrator::builder(config)
            .feeds(feeds)
            .classifiers(certain())
            .sink(Arc::new(RecordingSink::default()))
            .stats(create_shared_stats())
            .spawner(WorkerSpawner::Thread)
            .build()
            .unwrap();

        assert_eq!(orch.run_capture_job(3, None).unwrap(), 40);
        assert_eq!(opened.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(orch.dataset().row_count().unwrap(), 40);

        // Let the detached first attempt finish its disconnect.
        std::thread::sleep(Duration::from_millis(1200));
        assert_eq!(orch.dataset().row_count().unwrap(), 40);
    }

    #[test]
    fn test_probe_and_power_off() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), streaming_feeds());

        assert!(orch.probe_connectivity(Some(Duration::from_secs(1))));
        assert_eq!(orch.stats().stats().probes_succeeded, 1);
        assert!(orch.power_off_device(Some(Duration::from_secs(1))));
    }

    #[test]
    fn test_probe_runs_alongside_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), streaming_feeds());

        orch.start_pipeline().unwrap();
        assert!(orch.probe_connectivity(Some(Duration::from_secs(1))));
        assert_eq!(orch.pipeline_state(), PipelineState::Streaming);
        orch.stop_pipeline().unwrap();
    }

    #[test]
    fn test_artifacts_and_accuracy() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), streaming_feeds());

        assert_eq!(
            orch.check_artifacts(),
            ArtifactStatus {
                dataset: false,
                model: false
            }
        );
        assert_eq!(orch.last_accuracy().unwrap(), None);

        orch.reset_dataset().unwrap();
        std::fs::write(orch.config().metadata_path(), r#"{"accuracy": 88}"#).unwrap();
        assert!(orch.check_artifacts().dataset);
        assert_eq!(orch.last_accuracy().unwrap(), Some(88.0));
    }
}
