//! Device reachability probes and remote power-off.
//!
//! Both open their own device handle and never touch a running pipeline or
//! capture job.

use crate::cancel::CancelToken;
use crate::collector::{AcquisitionMode, FeedFactory, FeedSession, Indicators};
use crate::error::AgentError;
use crate::supervisor::retry::JobRetrySupervisor;
use crate::supervisor::worker::{WorkerSpawner, WorkerTask};
use std::sync::Arc;
use std::time::Duration;

/// Pause between the shutdown buzz and the power-off command.
pub const POWER_OFF_SETTLE: Duration = Duration::from_secs(2);

/// Connect, then disconnect. Reachable means the connect succeeded.
pub fn probe_device(feeds: &dyn FeedFactory) -> Result<(), AgentError> {
    let session = FeedSession::connect(feeds.open(AcquisitionMode::Preprocessed), "probe")?;
    if let Err(e) = session.release() {
        tracing::debug!(error = %e, "probe disconnect failed");
    }
    Ok(())
}

/// Connect, buzz, wait `settle`, then switch the device off.
pub fn power_off_device(
    feeds: &dyn FeedFactory,
    settle: Duration,
    cancel: &CancelToken,
) -> Result<(), AgentError> {
    let mut session =
        FeedSession::connect(feeds.open(AcquisitionMode::Preprocessed), "power-off")?;

    if let Err(e) = session.feed().configure_indicators(Indicators::SHUTDOWN) {
        tracing::warn!(error = %e, "could not signal shutdown on device");
    }
    if !cancel.sleep(settle) {
        return Err(AgentError::Worker("power-off cancelled".to_string()));
    }

    session.feed().power_off().map_err(AgentError::from)?;
    tracing::info!("device powered off");
    Ok(())
}

/// Runs probes and power-off requests in supervised workers.
pub struct ConnectivitySupervisor {
    feeds: Arc<dyn FeedFactory>,
    spawner: WorkerSpawner,
    retry: JobRetrySupervisor,
    power_off_settle: Duration,
}

impl ConnectivitySupervisor {
    pub fn new(
        feeds: Arc<dyn FeedFactory>,
        spawner: WorkerSpawner,
        retry: JobRetrySupervisor,
    ) -> Self {
        Self {
            feeds,
            spawner,
            retry,
            power_off_settle: POWER_OFF_SETTLE,
        }
    }

    pub fn with_power_off_settle(mut self, settle: Duration) -> Self {
        self.power_off_settle = settle;
        self
    }

    /// `true` iff a connect/disconnect cycle finishes within `timeout`.
    /// An overrunning worker is terminated.
    pub fn probe(&self, timeout: Duration) -> bool {
        let report = self.retry.execute(
            "probe",
            |_attempt| {
                let feeds = self.feeds.clone();
                self.spawner
                    .spawn(&WorkerTask::Probe, move |_cancel| probe_device(feeds.as_ref()))
            },
            timeout,
            1,
        );

        let reachable = report.is_completed();
        tracing::info!(
            reachable,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "connectivity probe finished"
        );
        reachable
    }

    /// `true` iff the device acknowledged power-off within `timeout`.
    pub fn power_off(&self, timeout: Duration) -> bool {
        let settle = self.power_off_settle;
        let report = self.retry.execute(
            "power-off",
            |_attempt| {
                let feeds = self.feeds.clone();
                self.spawner.spawn(&WorkerTask::PowerOff, move |cancel| {
                    power_off_device(feeds.as_ref(), settle, cancel)
                })
            },
            timeout,
            1,
        );

        let done = report.is_completed();
        if !done {
            tracing::warn!(status = ?report.status, "power-off did not complete");
        }
        done
    }
}
