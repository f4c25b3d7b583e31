//! Sample acquisition for the EMG Gesture Agent.
//!
//! The hardware driver sits behind the [`SensorFeed`] trait. A synthetic
//! device and a scripted playback feed are provided for running without an
//! armband and for tests.

pub mod feed;
pub mod scripted;
pub mod simulated;
pub mod types;

// Re-export commonly used types
pub use feed::{FeedError, FeedFactory, FeedSession, SampleHandler, SensorFeed};
pub use scripted::{FeedCounters, ScriptedFeed};
pub use simulated::{SimulatedFeed, SimulatedFeedConfig, SimulatedFeedFactory};
pub use types::{AcquisitionMode, Indicators, Sample, Vibration, CHANNEL_COUNT, RAW_MAX};
