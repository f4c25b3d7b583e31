//! Core functionality for the EMG Gesture Agent.
//!
//! This module contains:
//! - Window management for collecting samples into fixed-length windows
//! - The classifier seam and the built-in linear model
//! - The real-time classification pipeline

pub mod classifier;
pub mod pipeline;
pub mod windowing;

// Re-export commonly used types
pub use classifier::{
    label_name, top_label, ClassificationResult, Classifier, ClassifierProvider, FixedClassifier,
    LinearModel, ModelFile, Preloaded, GESTURE_LABELS, LABEL_COUNT,
};
pub use pipeline::{
    ClassificationPipeline, PipelineReport, PipelineState, SampleOutcome, WindowClassifier,
};
pub use windowing::{NormalizedWindow, SampleWindow, DEFAULT_WINDOW_LEN};
