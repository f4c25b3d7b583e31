//! Error taxonomy shared by the pipeline, capture jobs and supervisors.

use std::time::Duration;

/// Errors surfaced by the agent's operations.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentError {
    /// The sensor could not be acquired (connect failed).
    DeviceUnavailable(String),
    /// The sensor failed mid-session.
    DeviceError(String),
    /// A supervised job overran its deadline on every attempt.
    TimedOutExhausted { attempts: u32, deadline: Duration },
    /// A conflicting activation is already in progress.
    AlreadyRunning(&'static str),
    /// Nothing to stop.
    NotRunning(&'static str),
    /// A dataset or notification write failed.
    SinkWriteFailure(String),
    /// A capture job specification was rejected.
    InvalidJob(String),
    /// The classifier could not be loaded or returned a malformed prediction.
    Model(String),
    /// A worker could not be launched or exited abnormally.
    Worker(String),
}

impl AgentError {
    /// Short machine-readable code, used by the control surface.
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::DeviceUnavailable(_) => "DEVICE_UNAVAILABLE",
            AgentError::DeviceError(_) => "DEVICE_ERROR",
            AgentError::TimedOutExhausted { .. } => "TIMED_OUT_EXHAUSTED",
            AgentError::AlreadyRunning(_) => "ALREADY_RUNNING",
            AgentError::NotRunning(_) => "NOT_RUNNING",
            AgentError::SinkWriteFailure(_) => "SINK_WRITE_FAILURE",
            AgentError::InvalidJob(_) => "INVALID_JOB",
            AgentError::Model(_) => "MODEL_ERROR",
            AgentError::Worker(_) => "WORKER_ERROR",
        }
    }

    /// The message without the variant prefix.
    pub fn detail(&self) -> String {
        match self {
            AgentError::DeviceUnavailable(e)
            | AgentError::DeviceError(e)
            | AgentError::SinkWriteFailure(e)
            | AgentError::InvalidJob(e)
            | AgentError::Model(e)
            | AgentError::Worker(e) => e.clone(),
            AgentError::AlreadyRunning(what) | AgentError::NotRunning(what) => what.to_string(),
            AgentError::TimedOutExhausted { .. } => self.to_string(),
        }
    }

    /// Rebuild an error reported by a worker process from its code and detail.
    ///
    /// Codes that cannot cross a process boundary become `Worker`.
    pub fn from_code(code: &str, detail: String) -> Self {
        match code {
            "DEVICE_UNAVAILABLE" => AgentError::DeviceUnavailable(detail),
            "DEVICE_ERROR" => AgentError::DeviceError(detail),
            "SINK_WRITE_FAILURE" => AgentError::SinkWriteFailure(detail),
            "INVALID_JOB" => AgentError::InvalidJob(detail),
            "MODEL_ERROR" => AgentError::Model(detail),
            _ => AgentError::Worker(detail),
        }
    }
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentError::DeviceUnavailable(e) => write!(f, "Device unavailable: {e}"),
            AgentError::DeviceError(e) => write!(f, "Device error: {e}"),
            AgentError::TimedOutExhausted { attempts, deadline } => write!(
                f,
                "Job exceeded its {:.1}s deadline on all {attempts} attempt(s)",
                deadline.as_secs_f64()
            ),
            AgentError::AlreadyRunning(what) => write!(f, "{what} is already running"),
            AgentError::NotRunning(what) => write!(f, "{what} is not running"),
            AgentError::SinkWriteFailure(e) => write!(f, "Sink write failed: {e}"),
            AgentError::InvalidJob(e) => write!(f, "Invalid job: {e}"),
            AgentError::Model(e) => write!(f, "Model error: {e}"),
            AgentError::Worker(e) => write!(f, "Worker error: {e}"),
        }
    }
}

impl std::error::Error for AgentError {}
