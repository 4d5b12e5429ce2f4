use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::classifier::{HIGH_THRESHOLD, LOW_THRESHOLD};
use crate::error::{SosError, SosResult};

/// Longest countdown or cooldown accepted, one day.
pub const MAX_PERIOD_SECS: u64 = 86_400;
pub const MAX_TICK_MILLIS: u64 = 60_000;

/// Engine tuning. Every field has a default, so a config file only needs
/// the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Magnitude (m/s²) at or above which a sample is a suspected accident
    pub low_threshold: f64,
    /// Magnitude at or above which the incident is confirmed immediately
    pub high_threshold: f64,
    pub countdown_secs: u64,
    pub cooldown_secs: u64,
    pub tick_millis: u64,
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            low_threshold: LOW_THRESHOLD,
            high_threshold: HIGH_THRESHOLD,
            countdown_secs: 5,
            cooldown_secs: 60,
            tick_millis: 1000,
            event_capacity: 64,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> SosResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| SosError::Config(format!("{}: {}", path.display(), e)))?;
        let config: EngineConfig = serde_json::from_str(&text)
            .map_err(|e| SosError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SosResult<()> {
        if !(self.low_threshold > 0.0) {
            return Err(SosError::Config(format!(
                "low_threshold must be positive, got {}",
                self.low_threshold
            )));
        }
        if !(self.low_threshold < self.high_threshold) {
            return Err(SosError::Config(format!(
                "low_threshold {} must be below high_threshold {}",
                self.low_threshold, self.high_threshold
            )));
        }
        if self.countdown_secs == 0 {
            return Err(SosError::Config("countdown_secs must be at least 1".to_string()));
        }
        if self.tick_millis == 0 {
            return Err(SosError::Config("tick_millis must be at least 1".to_string()));
        }
        for (name, value) in [
            ("countdown_secs", self.countdown_secs),
            ("cooldown_secs", self.cooldown_secs),
        ] {
            if value > MAX_PERIOD_SECS {
                return Err(SosError::Config(format!(
                    "{} must be at most {}, got {}",
                    name, MAX_PERIOD_SECS, value
                )));
            }
        }
        if self.tick_millis > MAX_TICK_MILLIS {
            return Err(SosError::Config(format!(
                "tick_millis must be at most {}, got {}",
                MAX_TICK_MILLIS, self.tick_millis
            )));
        }
        Ok(())
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}
