use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::SosResult;
use crate::incident::IncidentState;
use crate::location::GpsSignal;

/// Snapshot of a running monitor, written periodically as `live_status.json`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MonitorStatus {
    /// Epoch milliseconds when the snapshot was taken
    pub timestamp: i64,
    pub active_secs: u64,
    pub state: IncidentState,
    pub gate_open: bool,
    pub cooldown_remaining_secs: f64,
    // Counters
    pub samples: u64,
    pub incidents_detected: u64,
    pub incidents_cancelled: u64,
    pub dispatches: u64,
    // GPS
    pub gps_accuracy: Option<f64>,
    pub gps_signal: GpsSignal,
    // Battery
    pub battery_percent: Option<u8>,
}

impl MonitorStatus {
    pub fn new(state: IncidentState) -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
            active_secs: 0,
            state,
            gate_open: true,
            cooldown_remaining_secs: 0.0,
            samples: 0,
            incidents_detected: 0,
            incidents_cancelled: 0,
            dispatches: 0,
            gps_accuracy: None,
            gps_signal: GpsSignal::Searching,
            battery_percent: None,
        }
    }

    pub fn with_gps_accuracy(mut self, accuracy: Option<f64>) -> Self {
        self.gps_accuracy = accuracy;
        self.gps_signal = accuracy
            .map(GpsSignal::from_accuracy)
            .unwrap_or(GpsSignal::Searching);
        self
    }

    pub fn with_battery(mut self, percent: Option<u8>) -> Self {
        self.battery_percent = percent;
        self
    }

    /// Battery level for display, "--" when unknown.
    pub fn battery_label(&self) -> String {
        match self.battery_percent {
            Some(percent) => format!("{}%", percent),
            None => "--".to_string(),
        }
    }

    /// "HH:MM:SS" form of `active_secs`.
    pub fn active_time(&self) -> String {
        let secs = self.active_secs;
        format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
    }

    pub fn save(&self, path: &Path) -> SosResult<()> {
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}
