//! Synthetic armband used when no hardware driver is linked in.
//!
//! Produces an 8-channel envelope at a fixed rate. Each gesture pattern
//! raises a different pair of channels, and the active pattern rotates on a
//! fixed period so a classifier sees changing input.

use crate::collector::feed::{FeedError, FeedFactory, SampleHandler, SensorFeed};
use crate::collector::types::{AcquisitionMode, Indicators, Sample, CHANNEL_COUNT, RAW_MAX};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

/// Behaviour of the synthetic device.
#[derive(Debug, Clone)]
pub struct SimulatedFeedConfig {
    pub sample_rate_hz: u32,
    pub connect_delay: Duration,
    pub disconnect_delay: Duration,
    /// How long each gesture pattern is held before rotating
    pub pattern_period: Duration,
    pub pattern_count: usize,
    /// Simulate an absent device
    pub unavailable: bool,
    pub seed: Option<u64>,
}

impl Default for SimulatedFeedConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 200,
            connect_delay: Duration::from_millis(100),
            disconnect_delay: Duration::from_millis(50),
            pattern_period: Duration::from_secs(3),
            pattern_count: 6,
            unavailable: false,
            seed: None,
        }
    }
}

pub struct SimulatedFeed {
    config: SimulatedFeedConfig,
    mode: AcquisitionMode,
    handlers: Vec<SampleHandler>,
    rng: StdRng,
    connected_at: Option<Instant>,
    emitted: u64,
    indicators: Option<Indicators>,
}

impl SimulatedFeed {
    pub fn new(config: SimulatedFeedConfig, mode: AcquisitionMode) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            mode,
            handlers: Vec::new(),
            rng,
            connected_at: None,
            emitted: 0,
            indicators: None,
        }
    }

    /// Last indicator state pushed to the device.
    pub fn indicators(&self) -> Option<Indicators> {
        self.indicators
    }

    fn sample_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.config.sample_rate_hz.max(1)))
    }

    fn synthesize(&mut self, elapsed: Duration) -> Sample {
        let patterns = self.config.pattern_count.max(1);
        let period = self.config.pattern_period.as_secs_f64().max(f64::EPSILON);
        let pattern = (elapsed.as_secs_f64() / period) as usize % patterns;

        let primary = pattern % CHANNEL_COUNT;
        let secondary = (pattern * 3 + 1) % CHANNEL_COUNT;
        let noise_span = match self.mode {
            AcquisitionMode::Preprocessed => 20.0,
            AcquisitionMode::Filtered => 60.0,
            AcquisitionMode::Raw => 120.0,
        };

        let mut channels = [0u16; CHANNEL_COUNT];
        for (idx, value) in channels.iter_mut().enumerate() {
            let base = if idx == primary {
                700.0
            } else if idx == secondary {
                450.0
            } else {
                120.0
            };
            let noisy: f64 = base + self.rng.gen_range(-noise_span..noise_span);
            *value = noisy.clamp(0.0, f64::from(RAW_MAX)) as u16;
        }
        Sample::new(channels)
    }
}

impl SensorFeed for SimulatedFeed {
    fn connect(&mut self) -> Result<(), FeedError> {
        std::thread::sleep(self.config.connect_delay);
        if self.config.unavailable {
            return Err(FeedError::Unavailable("no armband in range".to_string()));
        }
        self.connected_at = Some(Instant::now());
        self.emitted = 0;
        tracing::debug!(mode = %self.mode, "simulated armband connected");
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), FeedError> {
        std::thread::sleep(self.config.disconnect_delay);
        self.connected_at = None;
        Ok(())
    }

    fn register_sample_handler(&mut self, handler: SampleHandler) {
        self.handlers.push(handler);
    }

    fn clear_sample_handlers(&mut self) {
        self.handlers.clear();
    }

    fn run_once(&mut self) -> Result<(), FeedError> {
        let connected_at = self.connected_at.ok_or(FeedError::NotConnected)?;
        let interval = self.sample_interval();

        // Emit every sample that is due, then sleep until the next one.
        let elapsed = connected_at.elapsed();
        let due = (elapsed.as_secs_f64() / interval.as_secs_f64()) as u64;
        while self.emitted < due {
            let at = interval.mul_f64(self.emitted as f64);
            let sample = self.synthesize(at);
            for handler in self.handlers.iter_mut() {
                handler(sample);
            }
            self.emitted += 1;
        }

        let next_at = interval.mul_f64((self.emitted + 1) as f64);
        let wait = next_at.saturating_sub(connected_at.elapsed());
        std::thread::sleep(wait.min(Duration::from_millis(20)));
        Ok(())
    }

    fn configure_indicators(&mut self, indicators: Indicators) -> Result<(), FeedError> {
        if self.connected_at.is_none() {
            return Err(FeedError::NotConnected);
        }
        self.indicators = Some(indicators);
        Ok(())
    }

    fn power_off(&mut self) -> Result<(), FeedError> {
        if self.connected_at.take().is_none() {
            return Err(FeedError::NotConnected);
        }
        tracing::info!("simulated armband powered off");
        Ok(())
    }
}

/// Factory handing out independent simulated handles.
#[derive(Debug, Clone, Default)]
pub struct SimulatedFeedFactory {
    pub config: SimulatedFeedConfig,
}

impl SimulatedFeedFactory {
    pub fn new(config: SimulatedFeedConfig) -> Self {
        Self { config }
    }
}

impl FeedFactory for SimulatedFeedFactory {
    fn open(&self, mode: AcquisitionMode) -> Box<dyn SensorFeed> {
        Box::new(SimulatedFeed::new(self.config.clone(), mode))
    }
}
