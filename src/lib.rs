//! EMG Gesture Agent - real-time gesture recognition from an 8-channel EMG armband.
//!
//! This library streams samples from the armband, classifies fixed-length
//! windows with a pre-trained model and forwards confident results to a
//! remote endpoint. It also records labeled training data in supervised,
//! time-boxed capture jobs and probes device reachability.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        EMG Gesture Agent                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐   ┌─────────────┐   ┌────────────┐   ┌────────┐  │
//! │  │ SensorFeed │──▶│  Windowing  │──▶│ Classifier │──▶│  Sink  │  │
//! │  │  (device)  │   │ (100 samp.) │   │  (gating)  │   │ (HTTP) │  │
//! │  └────────────┘   └─────────────┘   └────────────┘   └────────┘  │
//! │         │                                                        │
//! │         ▼                                                        │
//! │  ┌────────────┐   ┌─────────────┐   ┌────────────┐               │
//! │  │  Capture   │──▶│   Dataset   │   │ Supervisor │ deadline,     │
//! │  │    job     │   │    (CSV)    │   │  (worker)  │ retry, kill   │
//! │  └────────────┘   └─────────────┘   └────────────┘               │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use emg_gesture_agent::{Config, Orchestrator};
//!
//! let config = Config::load().unwrap_or_default();
//! let orchestrator = Orchestrator::builder(config).build().expect("orchestrator");
//!
//! if orchestrator.probe_connectivity(None) {
//!     orchestrator.start_pipeline().expect("start");
//!     std::thread::sleep(std::time::Duration::from_secs(10));
//!     let report = orchestrator.stop_pipeline().expect("stop");
//!     println!("dispatched {} results", report.results_dispatched);
//! }
//! ```

pub mod cancel;
pub mod capture;
pub mod collector;
pub mod config;
pub mod core;
pub mod error;
pub mod metadata;
pub mod notify;
pub mod orchestrator;
pub mod stats;
pub mod supervisor;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use cancel::{ActivationSlot, CancelToken};
pub use capture::{CaptureJob, CaptureJobSpec, CaptureRecord, Dataset};
pub use collector::{AcquisitionMode, FeedFactory, Sample, SensorFeed};
pub use config::{Config, IsolationMode};
pub use core::{
    ClassificationPipeline, ClassificationResult, Classifier, PipelineState, WindowClassifier,
};
pub use error::AgentError;
pub use notify::ResultSink;
pub use orchestrator::{ArtifactStatus, Orchestrator, OrchestratorBuilder};
pub use stats::{SessionStats, SharedSessionStats};
pub use supervisor::{ConnectivitySupervisor, ExecutionReport, JobRetrySupervisor, JobStatus};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
