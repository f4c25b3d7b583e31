//! Result dispatch to the remote consumer.
//!
//! Recognised gestures are pushed to a fixed HTTP endpoint that the
//! prosthesis controller polls. Delivery is fire-and-forget: failures are
//! reported to the caller, which logs them and keeps streaming.

use crate::config::NotifierConfig;
use crate::core::classifier::ClassificationResult;
use crate::error::AgentError;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Receives every dispatched classification result.
pub trait ResultSink: Send + Sync {
    fn dispatch(&self, result: &ClassificationResult) -> Result<(), AgentError>;
}

/// Notification client error types.
#[derive(Debug)]
pub enum NotifyError {
    /// Client could not be built
    Config(String),
    /// Network/HTTP error
    Network(String),
    /// Endpoint returned an error response
    Server { status: u16, message: String },
}

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyError::Config(msg) => write!(f, "Notifier config error: {msg}"),
            NotifyError::Network(msg) => write!(f, "Notifier network error: {msg}"),
            NotifyError::Server { status, message } => {
                write!(f, "Notifier endpoint error ({status}): {message}")
            }
        }
    }
}

impl std::error::Error for NotifyError {}

impl From<NotifyError> for AgentError {
    fn from(err: NotifyError) -> Self {
        AgentError::SinkWriteFailure(err.to_string())
    }
}

/// Body written to the endpoint. Field names are what the consumer reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    #[serde(rename = "mensaje")]
    pub label: usize,
    #[serde(rename = "velocidad")]
    pub auxiliary: i64,
}

/// Async client for the notification endpoint.
pub struct NotificationClient {
    config: NotifierConfig,
    client: reqwest::Client,
}

impl NotificationClient {
    pub fn new(config: NotifierConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| NotifyError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    pub fn payload_for(&self, result: &ClassificationResult) -> NotificationPayload {
        NotificationPayload {
            label: result.label,
            auxiliary: self.config.auxiliary,
        }
    }

    /// Replace the endpoint's current value with this result.
    pub async fn send(&self, result: &ClassificationResult) -> Result<(), NotifyError> {
        let response = self
            .client
            .put(&self.config.url)
            .json(&self.payload_for(result))
            .send()
            .await
            .map_err(|e| NotifyError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(NotifyError::Server {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }
}

/// Blocking notifier for use from the classifier thread.
pub struct BlockingNotifier {
    inner: NotificationClient,
    runtime: Option<tokio::runtime::Runtime>,
}

impl BlockingNotifier {
    pub fn new(config: NotifierConfig) -> Result<Self, NotifyError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| NotifyError::Config(format!("Failed to create runtime: {e}")))?;

        Ok(Self {
            inner: NotificationClient::new(config)?,
            runtime: Some(runtime),
        })
    }

    pub fn url(&self) -> &str {
        self.inner.url()
    }
}

impl ResultSink for BlockingNotifier {
    fn dispatch(&self, result: &ClassificationResult) -> Result<(), AgentError> {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| AgentError::SinkWriteFailure("notifier is shut down".to_string()))?;
        runtime
            .block_on(self.inner.send(result))
            .map_err(AgentError::from)
    }
}

impl Drop for BlockingNotifier {
    fn drop(&mut self) {
        // The last owner may be an async task (the HTTP server state).
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Logs results without sending them anywhere.
#[derive(Debug, Default)]
pub struct LogSink;

impl ResultSink for LogSink {
    fn dispatch(&self, result: &ClassificationResult) -> Result<(), AgentError> {
        tracing::info!(
            label = result.label,
            gesture = result.label_name(),
            "no notifier configured, result not forwarded"
        );
        Ok(())
    }
}

/// Keeps every dispatched result in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    results: Mutex<Vec<ClassificationResult>>,
    fail: bool,
}

impl RecordingSink {
    /// A sink that records and then reports a write failure.
    pub fn failing() -> Self {
        Self {
            results: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn results(&self) -> Vec<ClassificationResult> {
        self.results.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl ResultSink for RecordingSink {
    fn dispatch(&self, result: &ClassificationResult) -> Result<(), AgentError> {
        if let Ok(mut results) = self.results.lock() {
            results.push(result.clone());
        }
        if self.fail {
            return Err(AgentError::SinkWriteFailure("recording sink set to fail".to_string()));
        }
        Ok(())
    }
}

/// Build the configured sink: HTTP when an endpoint is set, log-only otherwise.
pub fn sink_from_config(
    config: Option<&NotifierConfig>,
) -> Result<Box<dyn ResultSink>, NotifyError> {
    match config {
        Some(cfg) => Ok(Box::new(BlockingNotifier::new(cfg.clone())?)),
        None => Ok(Box::new(LogSink)),
    }
}
