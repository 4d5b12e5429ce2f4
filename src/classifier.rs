use serde::{Deserialize, Serialize};

use crate::sensors::MotionSample;

/// Magnitude (m/s^2) at which a sample is a possible accident.
pub const LOW_THRESHOLD: f64 = 30.0;
/// Magnitude (m/s^2) at which a sample is a severe impact.
pub const HIGH_THRESHOLD: f64 = 45.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SeverityTier {
    None,
    Low,
    High,
}

/// Buckets samples by acceleration magnitude. Stateless.
#[derive(Debug, Clone, Copy)]
pub struct MotionClassifier {
    low: f64,
    high: f64,
}

impl MotionClassifier {
    pub fn new() -> Self {
        Self::with_thresholds(LOW_THRESHOLD, HIGH_THRESHOLD)
    }

    /// Caller guarantees `low < high`; `EngineConfig::validate` enforces it.
    pub fn with_thresholds(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    pub fn classify(&self, sample: &MotionSample) -> SeverityTier {
        self.classify_magnitude(sample.magnitude())
    }

    pub fn classify_magnitude(&self, magnitude: f64) -> SeverityTier {
        if magnitude >= self.high {
            SeverityTier::High
        } else if magnitude >= self.low {
            SeverityTier::Low
        } else {
            // NaN lands here too
            SeverityTier::None
        }
    }
}

impl Default for MotionClassifier {
    fn default() -> Self {
        Self::new()
    }
}
