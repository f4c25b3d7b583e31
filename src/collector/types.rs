//! Sample and device-control types for the EMG armband.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of EMG channels reported by the armband.
pub const CHANNEL_COUNT: usize = 8;

/// Upper bound of the raw per-channel scale.
pub const RAW_MAX: u16 = 1023;

/// One multi-channel reading, in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// When the reading reached the host
    pub timestamp: DateTime<Utc>,
    /// Raw channel values (0..=RAW_MAX)
    pub channels: [u16; CHANNEL_COUNT],
}

impl Sample {
    pub fn new(channels: [u16; CHANNEL_COUNT]) -> Self {
        Self {
            timestamp: Utc::now(),
            channels,
        }
    }

    /// A sample with every channel at `value`.
    pub fn splat(value: u16) -> Self {
        Self::new([value; CHANNEL_COUNT])
    }

    /// Scale into [0, 1] using the fixed device bounds.
    ///
    /// Values above `RAW_MAX` are clamped, so the result never leaves the
    /// unit interval.
    pub fn normalized(&self) -> [f32; CHANNEL_COUNT] {
        let mut out = [0.0f32; CHANNEL_COUNT];
        for (dst, &raw) in out.iter_mut().zip(self.channels.iter()) {
            *dst = f32::from(raw.min(RAW_MAX)) / f32::from(RAW_MAX);
        }
        out
    }
}

/// Signal processing stage requested from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionMode {
    /// Rectified, smoothed envelope (what the classifier was trained on)
    #[default]
    Preprocessed,
    /// Band-filtered signal
    Filtered,
    /// Unprocessed ADC values
    Raw,
}

impl std::fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AcquisitionMode::Preprocessed => write!(f, "preprocessed"),
            AcquisitionMode::Filtered => write!(f, "filtered"),
            AcquisitionMode::Raw => write!(f, "raw"),
        }
    }
}

impl std::str::FromStr for AcquisitionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "preprocessed" => Ok(AcquisitionMode::Preprocessed),
            "filtered" => Ok(AcquisitionMode::Filtered),
            "raw" => Ok(AcquisitionMode::Raw),
            other => Err(format!("unknown acquisition mode '{other}'")),
        }
    }
}

/// Haptic pulse length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Vibration {
    Short,
    Medium,
    Long,
}

/// LED colours and haptic feedback shown when a session starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Indicators {
    pub logo_rgb: [u8; 3],
    pub bar_rgb: [u8; 3],
    pub vibration: Option<Vibration>,
}

impl Indicators {
    /// Purple: real-time classification is live.
    pub const REALTIME: Indicators = Indicators {
        logo_rgb: [200, 0, 128],
        bar_rgb: [200, 0, 128],
        vibration: Some(Vibration::Short),
    };

    /// Green: a labeled capture is recording.
    pub const CAPTURE: Indicators = Indicators {
        logo_rgb: [0, 128, 0],
        bar_rgb: [0, 128, 0],
        vibration: Some(Vibration::Short),
    };

    /// LEDs off with a short buzz, sent just before powering down.
    pub const SHUTDOWN: Indicators = Indicators {
        logo_rgb: [0, 0, 0],
        bar_rgb: [0, 0, 0],
        vibration: Some(Vibration::Short),
    };
}
