//! The device seam: a push-style sample feed and a factory for isolated handles.

use crate::collector::types::{AcquisitionMode, Indicators, Sample};
use crate::error::AgentError;

/// Callback invoked for every sample the device delivers.
pub type SampleHandler = Box<dyn FnMut(Sample) + Send>;

/// Errors reported by a feed implementation.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedError {
    /// Device could not be reached or paired
    Unavailable(String),
    /// I/O failed on an established connection
    Io(String),
    /// Operation requires a connected device
    NotConnected,
}

impl std::fmt::Display for FeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedError::Unavailable(e) => write!(f, "device unavailable: {e}"),
            FeedError::Io(e) => write!(f, "device I/O failed: {e}"),
            FeedError::NotConnected => write!(f, "device is not connected"),
        }
    }
}

impl std::error::Error for FeedError {}

impl From<FeedError> for AgentError {
    fn from(err: FeedError) -> Self {
        match err {
            FeedError::Unavailable(e) => AgentError::DeviceUnavailable(e),
            other => AgentError::DeviceError(other.to_string()),
        }
    }
}

/// A connection to the armband.
///
/// Samples are pushed to registered handlers from inside `run_once`, on the
/// caller's thread, in arrival order.
pub trait SensorFeed: Send {
    fn connect(&mut self) -> Result<(), FeedError>;

    fn disconnect(&mut self) -> Result<(), FeedError>;

    fn register_sample_handler(&mut self, handler: SampleHandler);

    /// Drop every registered handler (and whatever they captured).
    fn clear_sample_handlers(&mut self);

    /// Pump one I/O iteration. Blocks for at most a short poll interval.
    fn run_once(&mut self) -> Result<(), FeedError>;

    fn configure_indicators(&mut self, indicators: Indicators) -> Result<(), FeedError>;

    fn power_off(&mut self) -> Result<(), FeedError>;
}

/// Opens a fresh, independent device handle per call.
pub trait FeedFactory: Send + Sync {
    fn open(&self, mode: AcquisitionMode) -> Box<dyn SensorFeed>;
}

impl<F> FeedFactory for F
where
    F: Fn(AcquisitionMode) -> Box<dyn SensorFeed> + Send + Sync,
{
    fn open(&self, mode: AcquisitionMode) -> Box<dyn SensorFeed> {
        self(mode)
    }
}

/// A connected feed that is disconnected on every exit path.
///
/// Dropping the session without calling [`FeedSession::release`] still
/// disconnects; failures there are logged and the handle is discarded.
pub struct FeedSession {
    feed: Box<dyn SensorFeed>,
    connected: bool,
    label: &'static str,
}

impl FeedSession {
    /// Connect `feed`, mapping failure to `DeviceUnavailable`.
    pub fn connect(mut feed: Box<dyn SensorFeed>, label: &'static str) -> Result<Self, AgentError> {
        match feed.connect() {
            Ok(()) => {
                tracing::debug!(session = label, "device connected");
                Ok(Self {
                    feed,
                    connected: true,
                    label,
                })
            }
            Err(e) => {
                tracing::warn!(session = label, error = %e, "device connect failed");
                Err(AgentError::DeviceUnavailable(e.to_string()))
            }
        }
    }

    pub fn feed(&mut self) -> &mut dyn SensorFeed {
        self.feed.as_mut()
    }

    /// Disconnect now. Returns the disconnect error, if any, for callers
    /// that want to report it; the handle is gone either way.
    pub fn release(mut self) -> Result<(), FeedError> {
        self.disconnect_inner()
    }

    fn disconnect_inner(&mut self) -> Result<(), FeedError> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        self.feed.clear_sample_handlers();
        let result = self.feed.disconnect();
        match &result {
            Ok(()) => tracing::debug!(session = self.label, "device disconnected"),
            Err(e) => {
                tracing::warn!(
                    session = self.label,
                    error = %e,
                    "disconnect failed, discarding handle"
                )
            }
        }
        result
    }
}

impl Drop for FeedSession {
    fn drop(&mut self) {
        let _ = self.disconnect_inner();
    }
}
