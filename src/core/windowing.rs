//! Fixed-length sample window feeding the classifier.
//!
//! The window holds the most recent `capacity` samples in arrival order.
//! Appending to a full window evicts the oldest sample.

use crate::collector::types::{Sample, CHANNEL_COUNT};
use std::collections::VecDeque;

/// Default number of samples per classification window (0.5 s at 200 Hz).
pub const DEFAULT_WINDOW_LEN: usize = 100;

/// A window scaled into [0, 1], one row per sample.
pub type NormalizedWindow = Vec<[f32; CHANNEL_COUNT]>;

/// Bounded FIFO of samples.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest one when at capacity.
    pub fn push(&mut self, sample: Sample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// Channel-wise scaling with the fixed device bounds.
    pub fn normalized(&self) -> NormalizedWindow {
        self.samples.iter().map(Sample::normalized).collect()
    }
}
