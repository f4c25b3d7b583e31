//! In-memory feed useful for tests and deterministic playback.

use crate::collector::feed::{FeedError, SampleHandler, SensorFeed};
use crate::collector::types::{Indicators, Sample};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Observable call counts, shared with clones handed out before the feed
/// moves into a worker.
#[derive(Debug, Clone, Default)]
pub struct FeedCounters {
    connects: Arc<AtomicUsize>,
    disconnects: Arc<AtomicUsize>,
    indicator_updates: Arc<AtomicUsize>,
    power_offs: Arc<AtomicUsize>,
}

impl FeedCounters {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn indicator_updates(&self) -> usize {
        self.indicator_updates.load(Ordering::SeqCst)
    }

    pub fn power_offs(&self) -> usize {
        self.power_offs.load(Ordering::SeqCst)
    }
}

/// Replays a fixed list of samples, `batch` per `run_once`.
///
/// Once the script is exhausted `run_once` idles for `idle` and returns `Ok`.
pub struct ScriptedFeed {
    script: VecDeque<Sample>,
    handlers: Vec<SampleHandler>,
    connected: bool,
    batch: usize,
    idle: Duration,
    connect_delay: Duration,
    disconnect_delay: Duration,
    fail_connect: bool,
    fail_disconnect: bool,
    fail_after: Option<usize>,
    delivered: usize,
    counters: FeedCounters,
}

impl ScriptedFeed {
    pub fn new(samples: impl IntoIterator<Item = Sample>) -> Self {
        Self {
            script: samples.into_iter().collect(),
            handlers: Vec::new(),
            connected: false,
            batch: 1,
            idle: Duration::from_millis(1),
            connect_delay: Duration::ZERO,
            disconnect_delay: Duration::ZERO,
            fail_connect: false,
            fail_disconnect: false,
            fail_after: None,
            delivered: 0,
            counters: FeedCounters::default(),
        }
    }

    /// `count` copies of the same sample.
    pub fn repeating(sample: Sample, count: usize) -> Self {
        Self::new(std::iter::repeat(sample).take(count))
    }

    pub fn counters(&self) -> FeedCounters {
        self.counters.clone()
    }

    pub fn with_batch(mut self, batch: usize) -> Self {
        self.batch = batch.max(1);
        self
    }

    pub fn with_idle(mut self, idle: Duration) -> Self {
        self.idle = idle;
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn with_disconnect_delay(mut self, delay: Duration) -> Self {
        self.disconnect_delay = delay;
        self
    }

    pub fn fail_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn fail_disconnect(mut self) -> Self {
        self.fail_disconnect = true;
        self
    }

    /// Report an I/O error after `count` samples were delivered.
    pub fn fail_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl SensorFeed for ScriptedFeed {
    fn connect(&mut self) -> Result<(), FeedError> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            std::thread::sleep(self.connect_delay);
        }
        if self.fail_connect {
            return Err(FeedError::Unavailable("scripted connect failure".to_string()));
        }
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), FeedError> {
        self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
        if !self.disconnect_delay.is_zero() {
            std::thread::sleep(self.disconnect_delay);
        }
        self.connected = false;
        if self.fail_disconnect {
            return Err(FeedError::Io("scripted disconnect failure".to_string()));
        }
        Ok(())
    }

    fn register_sample_handler(&mut self, handler: SampleHandler) {
        self.handlers.push(handler);
    }

    fn clear_sample_handlers(&mut self) {
        self.handlers.clear();
    }

    fn run_once(&mut self) -> Result<(), FeedError> {
        if !self.connected {
            return Err(FeedError::NotConnected);
        }

        for _ in 0..self.batch {
            if self.fail_after == Some(self.delivered) {
                return Err(FeedError::Io("scripted link loss".to_string()));
            }
            let Some(sample) = self.script.pop_front() else {
                std::thread::sleep(self.idle);
                return Ok(());
            };
            for handler in self.handlers.iter_mut() {
                handler(sample);
            }
            self.delivered += 1;
        }
        Ok(())
    }

    fn configure_indicators(&mut self, _indicators: Indicators) -> Result<(), FeedError> {
        if !self.connected {
            return Err(FeedError::NotConnected);
        }
        self.counters.indicator_updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn power_off(&mut self) -> Result<(), FeedError> {
        if !self.connected {
            return Err(FeedError::NotConnected);
        }
        self.counters.power_offs.fetch_add(1, Ordering::SeqCst);
        self.connected = false;
        Ok(())
    }
}
