use serde::Deserialize;
use std::sync::Mutex;
use tokio::process::Command;

/// Battery charge shown next to the monitor status. Reads are cheap and
/// return the last known level; refreshing is up to the implementation.
pub trait BatteryGauge: Send + Sync {
    fn percent(&self) -> Option<u8>;
}

/// Reports a fixed level, or nothing when the host has no battery to read.
pub struct FixedBattery {
    percent: Option<u8>,
}

impl FixedBattery {
    pub fn new(percent: Option<u8>) -> Self {
        Self {
            percent: percent.map(|p| p.min(100)),
        }
    }
}

impl BatteryGauge for FixedBattery {
    fn percent(&self) -> Option<u8> {
        self.percent
    }
}

#[derive(Deserialize)]
struct TermuxBatteryStatus {
    percentage: Option<f64>,
}

/// Parse `termux-battery-status` output, e.g. `{"percentage": 85, ...}`.
pub fn parse_battery_status(output: &str) -> Option<u8> {
    let status: TermuxBatteryStatus = serde_json::from_str(output.trim()).ok()?;
    let percentage = status.percentage?;
    if !percentage.is_finite() || percentage < 0.0 {
        return None;
    }
    Some(percentage.round().min(100.0) as u8)
}

/// Battery level via Termux:API. `refresh()` runs the command; `percent()`
/// returns the cached value.
#[derive(Default)]
pub struct TermuxBattery {
    percent: Mutex<Option<u8>>,
}

impl TermuxBattery {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn refresh(&self) -> Option<u8> {
        let level = match Command::new("termux-battery-status").output().await {
            Ok(output) if output.status.success() => {
                parse_battery_status(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                log::debug!("[BATTERY] termux-battery-status exited with {}", output.status);
                None
            }
            Err(err) => {
                log::debug!("[BATTERY] termux-battery-status unavailable: {}", err);
                None
            }
        };

        if let Ok(mut percent) = self.percent.lock() {
            *percent = level;
        }
        level
    }
}

impl BatteryGauge for TermuxBattery {
    fn percent(&self) -> Option<u8> {
        self.percent.lock().ok().and_then(|p| *p)
    }
}
