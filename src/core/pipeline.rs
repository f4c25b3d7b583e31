//! Real-time classification pipeline.
//!
//! The device loop only moves samples into a bounded channel; a dedicated
//! classifier thread owns the window, runs inference and dispatches results.
//! Arrival order is preserved end to end.
//!
//! ```text
//!  SensorFeed::run_once ──▶ handler ──▶ [bounded channel] ──▶ WindowClassifier
//!        (device thread)                                   (classifier thread)
//!                                                                 │
//!                                                                 ▼
//!                                                            ResultSink
//! ```

use crate::cancel::{ActivationSlot, CancelToken};
use crate::collector::{AcquisitionMode, FeedFactory, FeedSession, Indicators, Sample};
use crate::config::PipelineConfig;
use crate::core::classifier::{top_label, ClassificationResult, Classifier};
use crate::core::windowing::SampleWindow;
use crate::error::AgentError;
use crate::notify::ResultSink;
use crate::stats::SharedSessionStats;
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::thread;

/// Lifecycle of a pipeline instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Connecting,
    Streaming,
    Error,
}

/// What a single sample caused.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    /// Window not yet full
    Buffered,
    /// Classified below the confidence threshold; window kept
    Discarded(ClassificationResult),
    /// Classified, sent to the sink, window cleared
    Dispatched(ClassificationResult),
    /// The classifier failed; window kept
    PredictionFailed,
}

/// Counters for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub samples_received: u64,
    pub windows_classified: u64,
    pub results_dispatched: u64,
    pub results_discarded: u64,
    pub prediction_failures: u64,
}

/// Owns the window and applies confidence gating.
pub struct WindowClassifier {
    window: SampleWindow,
    classifier: Arc<dyn Classifier>,
    sink: Arc<dyn ResultSink>,
    threshold: f32,
    stats: SharedSessionStats,
    report: PipelineReport,
}

impl WindowClassifier {
    pub fn new(
        window_len: usize,
        threshold: f32,
        classifier: Arc<dyn Classifier>,
        sink: Arc<dyn ResultSink>,
        stats: SharedSessionStats,
    ) -> Self {
        Self {
            window: SampleWindow::new(window_len),
            classifier,
            sink,
            threshold,
            stats,
            report: PipelineReport::default(),
        }
    }

    /// Append a sample; classify once the window is full.
    pub fn on_sample(&mut self, sample: Sample) -> SampleOutcome {
        self.report.samples_received += 1;
        self.stats.record_sample();

        self.window.push(sample);
        if !self.window.is_full() {
            return SampleOutcome::Buffered;
        }
        self.classify_and_dispatch()
    }

    fn classify_and_dispatch(&mut self) -> SampleOutcome {
        let normalized = self.window.normalized();
        let result = match self
            .classifier
            .predict(&normalized)
            .and_then(|probs| top_label(&probs))
        {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "classification failed");
                self.report.prediction_failures += 1;
                return SampleOutcome::PredictionFailed;
            }
        };

        self.report.windows_classified += 1;
        self.stats.record_window_classified();

        if result.confidence < self.threshold {
            tracing::debug!(
                label = result.label,
                confidence = result.confidence,
                "below confidence threshold"
            );
            self.report.results_discarded += 1;
            self.stats.record_result_discarded();
            return SampleOutcome::Discarded(result);
        }

        tracing::info!(
            label = result.label,
            gesture = result.label_name(),
            confidence = f64::from(result.confidence),
            "gesture recognised"
        );
        if let Err(e) = self.sink.dispatch(&result) {
            tracing::warn!(error = %e, "result dispatch failed");
            self.stats.record_notification_failure();
        }
        self.report.results_dispatched += 1;
        self.stats.record_result_dispatched();

        self.window.clear();
        SampleOutcome::Dispatched(result)
    }

    pub fn window(&self) -> &SampleWindow {
        &self.window
    }

    pub fn report(&self) -> &PipelineReport {
        &self.report
    }

    fn into_report(self) -> PipelineReport {
        self.report
    }
}

/// Streams samples from a fresh device handle into a [`WindowClassifier`].
pub struct ClassificationPipeline {
    config: PipelineConfig,
    feeds: Arc<dyn FeedFactory>,
    classifier: Arc<dyn Classifier>,
    sink: Arc<dyn ResultSink>,
    stats: SharedSessionStats,
    slot: ActivationSlot,
    state: Arc<Mutex<PipelineState>>,
}

impl ClassificationPipeline {
    pub fn new(
        config: PipelineConfig,
        feeds: Arc<dyn FeedFactory>,
        classifier: Arc<dyn Classifier>,
        sink: Arc<dyn ResultSink>,
        stats: SharedSessionStats,
        slot: ActivationSlot,
    ) -> Self {
        Self {
            config,
            feeds,
            classifier,
            sink,
            stats,
            slot,
            state: Arc::new(Mutex::new(PipelineState::Idle)),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(PipelineState::Error)
    }

    /// Shared view of the state for observers on other threads.
    pub fn state_handle(&self) -> Arc<Mutex<PipelineState>> {
        self.state.clone()
    }

    fn set_state(&self, state: PipelineState) {
        if let Ok(mut current) = self.state.lock() {
            tracing::debug!(from = ?*current, to = ?state, "pipeline state");
            *current = state;
        }
    }

    /// Connect and stream until `cancel` fires or the device fails.
    pub fn start(&self, cancel: &CancelToken) -> Result<PipelineReport, AgentError> {
        self.start_with(cancel, None)
    }

    /// Like [`start`](Self::start), reporting connect success or failure on
    /// `ready` before entering the run loop.
    pub fn start_with(
        &self,
        cancel: &CancelToken,
        ready: Option<Sender<Result<(), AgentError>>>,
    ) -> Result<PipelineReport, AgentError> {
        let notify = |outcome: Result<(), AgentError>| {
            if let Some(ready) = &ready {
                let _ = ready.send(outcome);
            }
        };

        let Some(_guard) = self.slot.try_acquire() else {
            let err = AgentError::AlreadyRunning(self.slot.name());
            notify(Err(err.clone()));
            return Err(err);
        };

        self.set_state(PipelineState::Connecting);
        let feed = self.feeds.open(AcquisitionMode::Preprocessed);
        let mut session = match FeedSession::connect(feed, "realtime") {
            Ok(session) => session,
            Err(e) => {
                self.set_state(PipelineState::Error);
                notify(Err(e.clone()));
                return Err(e);
            }
        };

        let (tx, rx) = bounded::<Sample>(self.config.handoff_capacity.max(1));
        session.feed().register_sample_handler(Box::new(move |sample| {
            // Blocks when the classifier lags, so no sample is dropped.
            let _ = tx.send(sample);
        }));

        if let Err(e) = session.feed().configure_indicators(Indicators::REALTIME) {
            tracing::warn!(error = %e, "could not set device indicators");
        }

        let core = WindowClassifier::new(
            self.config.window_len,
            self.config.confidence_threshold,
            self.classifier.clone(),
            self.sink.clone(),
            self.stats.clone(),
        );
        let consumer = match spawn_classifier(core, rx, self.config.dispatch_delay) {
            Ok(handle) => handle,
            Err(e) => {
                self.set_state(PipelineState::Error);
                notify(Err(e.clone()));
                return Err(e);
            }
        };

        self.set_state(PipelineState::Streaming);
        notify(Ok(()));
        tracing::info!(
            window = self.config.window_len,
            threshold = self.config.confidence_threshold,
            "real-time classification started"
        );

        let mut failure = None;
        while !cancel.is_cancelled() {
            if let Err(e) = session.feed().run_once() {
                tracing::error!(error = %e, "device stream failed");
                failure = Some(AgentError::DeviceError(e.to_string()));
                break;
            }
        }

        // Disconnecting drops the handler and its sender, which ends the
        // classifier thread once it drains the backlog.
        let _ = session.release();
        let report = match consumer.join() {
            Ok(report) => report,
            Err(_) => {
                tracing::error!("classifier thread panicked");
                PipelineReport::default()
            }
        };

        match failure {
            Some(e) => {
                self.set_state(PipelineState::Error);
                Err(e)
            }
            None => {
                self.set_state(PipelineState::Idle);
                tracing::info!(
                    samples = report.samples_received,
                    dispatched = report.results_dispatched,
                    "real-time classification stopped"
                );
                Ok(report)
            }
        }
    }
}

fn spawn_classifier(
    mut core: WindowClassifier,
    rx: Receiver<Sample>,
    dispatch_delay: std::time::Duration,
) -> Result<thread::JoinHandle<PipelineReport>, AgentError> {
    thread::Builder::new()
        .name("emg-classifier".to_string())
        .spawn(move || {
            for sample in rx.iter() {
                if let SampleOutcome::Dispatched(_) = core.on_sample(sample) {
                    // Queued samples wait here and land in the fresh window.
                    thread::sleep(dispatch_delay);
                }
            }
            core.into_report()
        })
        .map_err(|e| AgentError::Worker(format!("failed to spawn classifier thread: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::ScriptedFeed;
    use crate::core::classifier::FixedClassifier;
    use crate::notify::RecordingSink;
    use crate::stats::create_shared_stats;
    use std::time::{Duration, Instant};

    fn confident() -> Arc<dyn Classifier> {
        Arc::new(FixedClassifier::new(vec![0.9, 0.02, 0.02, 0.02, 0.02, 0.02]))
    }

    fn unsure() -> Arc<dyn Classifier> {
        Arc::new(FixedClassifier::new(vec![0.3, 0.2, 0.1, 0.2, 0.1, 0.1]))
    }

    fn core_with(classifier: Arc<dyn Classifier>, sink: Arc<RecordingSink>) -> WindowClassifier {
        WindowClassifier::new(100, 0.5, classifier, sink, create_shared_stats())
    }

    #[test]
    fn test_no_classification_on_partial_window() {
        let sink = Arc::new(RecordingSink::default());
        let mut core = core_with(confident(), sink.clone());

        for _ in 0..99 {
            assert_eq!(core.on_sample(Sample::splat(0)), SampleOutcome::Buffered);
        }
        assert_eq!(core.report().windows_classified, 0);
        assert!(sink.results().is_empty());
    }

    #[test]
    fn test_dispatch_clears_window() {
        let sink = Arc::new(RecordingSink::default());
        let mut core = core_with(confident(), sink.clone());

        let outcomes: Vec<SampleOutcome> =
            (0..150).map(|_| core.on_sample(Sample::splat(0))).collect();

        let dispatched: Vec<usize> = outcomes
            .iter()
            .enumerate()
            .filter(|(_, o)| matches!(o, SampleOutcome::Dispatched(_)))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(dispatched, vec![99]);
        assert_eq!(core.window().len(), 50);

        let results = sink.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].label, 0);
        assert!((results[0].confidence - 0.9).abs() < 1e-6);

        for _ in 0..50 {
            core.on_sample(Sample::splat(0));
        }
        assert_eq!(sink.results().len(), 2);
        assert!(core.window().is_empty());
    }

    #[test]
    fn test_below_threshold_keeps_sliding() {
        let sink = Arc::new(RecordingSink::default());
        let mut core = core_with(unsure(), sink.clone());

        for _ in 0..130 {
            core.on_sample(Sample::splat(512));
        }

        // Every sample from the 100th on triggers an attempt; none dispatch.
        assert_eq!(core.report().windows_classified, 31);
        assert_eq!(core.report().results_discarded, 31);
        assert!(sink.results().is_empty());
        assert_eq!(core.window().len(), 100);
    }

    #[test]
    fn test_prediction_of_wrong_length_is_not_dispatched() {
        let sink = Arc::new(RecordingSink::default());
        let eight_labels = Arc::new(FixedClassifier::new(vec![
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.95,
        ]));
        let mut core = core_with(eight_labels, sink.clone());

        let outcomes: Vec<_> = (0..100).map(|_| core.on_sample(Sample::splat(0))).collect();
        assert_eq!(outcomes.last(), Some(&SampleOutcome::PredictionFailed));
        assert_eq!(core.report().prediction_failures, 1);
        assert!(sink.results().is_empty());
        assert_eq!(core.window().len(), 100);
    }

    #[test]
    fn test_sink_failure_is_swallowed() {
        let sink = Arc::new(RecordingSink::failing());
        let stats = create_shared_stats();
        let mut core = WindowClassifier::new(10, 0.5, confident(), sink, stats.clone());

        let outcomes: Vec<_> = (0..10).map(|_| core.on_sample(Sample::splat(0))).collect();
        assert!(matches!(outcomes.last(), Some(SampleOutcome::Dispatched(_))));
        assert_eq!(stats.stats().notification_failures, 1);
        assert!(core.window().is_empty());
    }

    #[test]
    fn test_pipeline_streams_and_stops() {
        let sink = Arc::new(RecordingSink::default());
        let feed_factory = |_mode: AcquisitionMode| -> Box<dyn crate::collector::SensorFeed> {
            Box::new(ScriptedFeed::repeating(Sample::splat(0), 250).with_batch(25))
        };
        let config = PipelineConfig {
            dispatch_delay: Duration::ZERO,
            ..PipelineConfig::default()
        };
        let stats = create_shared_stats();
        let pipeline = Arc::new(ClassificationPipeline::new(
            config,
            Arc::new(feed_factory),
            confident(),
            sink.clone(),
            stats.clone(),
            ActivationSlot::new("pipeline"),
        ));

        let cancel = CancelToken::new();
        let runner = {
            let pipeline = pipeline.clone();
            let cancel = cancel.clone();
            thread::spawn(move || pipeline.start(&cancel))
        };

        let start = Instant::now();
        while stats.stats().samples_received < 250 && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(5));
        }
        cancel.cancel();

        let report = runner.join().unwrap().unwrap();
        assert_eq!(report.samples_received, 250);
        assert_eq!(report.results_dispatched, 2);
        assert_eq!(pipeline.state(), PipelineState::Idle);
    }

    #[test]
    fn test_connect_failure_reports_device_unavailable() {
        let feed_factory = |_mode: AcquisitionMode| -> Box<dyn crate::collector::SensorFeed> {
            Box::new(ScriptedFeed::new(Vec::new()).fail_connect())
        };
        let pipeline = ClassificationPipeline::new(
            PipelineConfig::default(),
            Arc::new(feed_factory),
            confident(),
            Arc::new(RecordingSink::default()),
            create_shared_stats(),
            ActivationSlot::new("pipeline"),
        );

        let result = pipeline.start(&CancelToken::new());
        assert!(matches!(result, Err(AgentError::DeviceUnavailable(_))));
        assert_eq!(pipeline.state(), PipelineState::Error);
    }

    #[test]
    fn test_second_activation_is_rejected() {
        let slot = ActivationSlot::new("pipeline");
        let _held = slot.try_acquire().unwrap();

        let feed_factory = |_mode: AcquisitionMode| -> Box<dyn crate::collector::SensorFeed> {
            Box::new(ScriptedFeed::new(Vec::new()))
        };
        let pipeline = ClassificationPipeline::new(
            PipelineConfig::default(),
            Arc::new(feed_factory),
            confident(),
            Arc::new(RecordingSink::default()),
            create_shared_stats(),
            slot,
        );

        let (tx, rx) = bounded(1);
        let result = pipeline.start_with(&CancelToken::new(), Some(tx));
        assert!(matches!(result, Err(AgentError::AlreadyRunning(_))));
        assert!(matches!(rx.try_recv(), Ok(Err(AgentError::AlreadyRunning(_)))));
    }
}
