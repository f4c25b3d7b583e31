//! Configuration for the EMG Gesture Agent.

use crate::collector::types::AcquisitionMode;
use crate::core::windowing::DEFAULT_WINDOW_LEN;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Real-time classification settings
    pub pipeline: PipelineConfig,

    /// Labeled capture settings
    pub capture: CaptureConfig,

    /// Timeout for a connectivity probe
    #[serde(with = "duration_serde")]
    pub probe_timeout: Duration,

    /// Timeout for a power-off request
    #[serde(with = "duration_serde")]
    pub power_off_timeout: Duration,

    /// Pause after a forced worker termination before touching the device again
    #[serde(with = "duration_ms_serde")]
    pub settle_delay: Duration,

    /// How supervised work is isolated
    pub isolation: IsolationMode,

    /// Remote endpoint for classification results (log-only when absent)
    pub notifier: Option<NotifierConfig>,

    /// Directory holding the dataset, model, metadata and statistics
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("emg-gesture-agent");

        Self {
            pipeline: PipelineConfig::default(),
            capture: CaptureConfig::default(),
            probe_timeout: Duration::from_secs(10),
            power_off_timeout: Duration::from_secs(5),
            settle_delay: Duration::from_millis(500),
            isolation: IsolationMode::default(),
            notifier: None,
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("emg-gesture-agent")
            .join("config.json")
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Reject settings the supervisors cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.window_len == 0 {
            return Err(ConfigError::Invalid("pipeline.window_len must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.pipeline.confidence_threshold) {
            return Err(ConfigError::Invalid(
                "pipeline.confidence_threshold must be within [0, 1]".into(),
            ));
        }
        if self.capture.default_duration.is_zero() {
            return Err(ConfigError::Invalid("capture.default_duration must be > 0".into()));
        }
        if self.probe_timeout.is_zero() || self.power_off_timeout.is_zero() {
            return Err(ConfigError::Invalid("timeouts must be > 0".into()));
        }
        Ok(())
    }

    pub fn dataset_path(&self) -> PathBuf {
        self.data_path.join("emg_dataset.csv")
    }

    pub fn model_path(&self) -> PathBuf {
        self.data_path.join("gesture_model.json")
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.data_path.join("model_metadata.json")
    }

    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("session_stats.json")
    }
}

/// Real-time pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Samples per classification window
    pub window_len: usize,

    /// Minimum top-label probability for a result to be dispatched
    pub confidence_threshold: f32,

    /// Minimum pause after a dispatch before the next classification
    #[serde(with = "duration_ms_serde")]
    pub dispatch_delay: Duration,

    /// Samples buffered between the device loop and the classifier thread
    pub handoff_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_len: DEFAULT_WINDOW_LEN,
            confidence_threshold: 0.5,
            dispatch_delay: Duration::from_millis(100),
            handoff_capacity: 1024,
        }
    }
}

/// Labeled capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Recording length per label
    #[serde(with = "duration_serde")]
    pub default_duration: Duration,

    /// Added to the recording length to form the worker deadline
    #[serde(with = "duration_serde")]
    pub deadline_grace: Duration,

    /// Launches per capture job before giving up
    pub max_attempts: u32,

    pub mode: AcquisitionMode,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            default_duration: Duration::from_secs(10),
            deadline_grace: Duration::from_secs(15),
            max_attempts: 3,
            mode: AcquisitionMode::Preprocessed,
        }
    }
}

/// Where supervised work runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    /// Dedicated OS thread; termination is cooperative, a hung thread is detached
    #[default]
    Thread,
    /// Child process running `emg-agent worker`; termination kills it
    Process,
}

impl std::str::FromStr for IsolationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "thread" => Ok(IsolationMode::Thread),
            "process" => Ok(IsolationMode::Process),
            other => Err(format!("unknown isolation mode '{other}'")),
        }
    }
}

/// Remote notification endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    pub url: String,

    /// Secondary value sent with every label
    pub auxiliary: i64,

    #[serde(with = "duration_serde")]
    pub timeout: Duration,
}

impl NotifierConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auxiliary: 1,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration as (possibly fractional) seconds.
mod duration_serde {
    use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

/// Serde support for Duration as milliseconds.
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
