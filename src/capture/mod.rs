//! Labeled data capture.
//!
//! A capture job opens its own device handle, records every sample tagged
//! with the job's label for a fixed duration, and flushes the batch to the
//! dataset in one append.

pub mod dataset;

pub use dataset::{header, Dataset, LABEL_COLUMN};

use crate::cancel::CancelToken;
use crate::collector::{AcquisitionMode, FeedFactory, FeedSession, Indicators, Sample};
use crate::core::classifier::LABEL_COUNT;
use crate::error::AgentError;
use crossbeam_channel::unbounded;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// What to record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureJobSpec {
    pub label: usize,
    pub duration: Duration,
    pub mode: AcquisitionMode,
}

impl CaptureJobSpec {
    pub fn new(
        label: usize,
        duration: Duration,
        mode: AcquisitionMode,
    ) -> Result<Self, AgentError> {
        if label >= LABEL_COUNT {
            return Err(AgentError::InvalidJob(format!(
                "label {label} is outside 0..{LABEL_COUNT}"
            )));
        }
        if duration.is_zero() {
            return Err(AgentError::InvalidJob("duration must be > 0".to_string()));
        }
        Ok(Self {
            label,
            duration,
            mode,
        })
    }

    /// The first label of a collection cycle starts a fresh dataset.
    pub fn starts_cycle(&self) -> bool {
        self.label == 0
    }
}

/// One dataset row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureRecord {
    pub sample: Sample,
    pub label: usize,
}

/// What a capture run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRun {
    pub records: Vec<CaptureRecord>,
    /// Set when the device failed mid-run; `records` holds what arrived before.
    pub interruption: Option<AgentError>,
    /// Set when the run was cancelled before the duration elapsed.
    pub cancelled: bool,
}

/// A single time-boxed capture session.
#[derive(Debug, Clone)]
pub struct CaptureJob {
    spec: CaptureJobSpec,
}

impl CaptureJob {
    pub fn new(spec: CaptureJobSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &CaptureJobSpec {
        &self.spec
    }

    /// Record until the duration elapses, the device fails, or `cancel` fires.
    ///
    /// Fails only if the device cannot be acquired.
    pub fn run(
        &self,
        feeds: &dyn FeedFactory,
        cancel: &CancelToken,
    ) -> Result<CaptureRun, AgentError> {
        let feed = feeds.open(self.spec.mode);
        let mut session = FeedSession::connect(feed, "capture")?;

        let (tx, rx) = unbounded();
        let label = self.spec.label;
        session.feed().register_sample_handler(Box::new(move |sample| {
            let _ = tx.send(CaptureRecord { sample, label });
        }));

        if let Err(e) = session.feed().configure_indicators(Indicators::CAPTURE) {
            tracing::warn!(error = %e, "could not set device indicators");
        }

        tracing::info!(
            label,
            seconds = self.spec.duration.as_secs_f64(),
            mode = %self.spec.mode,
            "capture started"
        );

        let start = Instant::now();
        let mut interruption = None;
        let mut cancelled = false;
        while start.elapsed() < self.spec.duration {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            if let Err(e) = session.feed().run_once() {
                tracing::error!(label, error = %e, "device failed during capture");
                interruption = Some(AgentError::DeviceError(e.to_string()));
                break;
            }
        }

        // Releasing drops the handler, so everything sent is already queued.
        let _ = session.release();
        let records: Vec<CaptureRecord> = rx.try_iter().collect();

        tracing::info!(label, records = records.len(), cancelled, "capture finished");
        Ok(CaptureRun {
            records,
            interruption,
            cancelled,
        })
    }

    /// Run, then append the records to `dataset`.
    ///
    /// Partial data from a device failure is still written before the
    /// failure is returned. A cancelled run writes nothing.
    pub fn run_and_flush(
        &self,
        feeds: &dyn FeedFactory,
        dataset: &Dataset,
        cancel: &CancelToken,
    ) -> Result<usize, AgentError> {
        let run = self.run(feeds, cancel)?;
        if run.cancelled {
            return Err(AgentError::Worker(format!(
                "capture for label {} was cancelled",
                self.spec.label
            )));
        }

        // A terminated attempt can get here late and must not write.
        let written = dataset.append_unless_cancelled(&run.records, cancel)?;
        match run.interruption {
            Some(e) => {
                tracing::warn!(label = self.spec.label, written, "partial capture flushed");
                Err(e)
            }
            None => Ok(written),
        }
    }
}
