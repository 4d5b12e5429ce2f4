use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tokio::process::Command;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tokio::time::{interval, sleep, Duration};

use crate::error::{SosError, SosResult};

/// Standard gravity, used as the resting baseline of mock data.
pub const GRAVITY: f64 = 9.81;

/// Instantaneous acceleration in m/s^2.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl MotionSample {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// A sample with the time it was captured, as found in recorded logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedSample {
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl RecordedSample {
    pub fn sample(&self) -> MotionSample {
        MotionSample::new(self.x, self.y, self.z)
    }
}

/// A single scripted impact injected into mock data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScriptedImpact {
    pub at_secs: f64,
    pub magnitude: f64,
}

impl ScriptedImpact {
    /// Parse `SECS:MAGNITUDE`, e.g. `10:42.9`.
    pub fn parse(text: &str) -> SosResult<Self> {
        let (at, magnitude) = text
            .split_once(':')
            .ok_or_else(|| SosError::Config(format!("expected SECS:MAGNITUDE, got '{}'", text)))?;
        let at_secs: f64 = at
            .trim()
            .parse()
            .map_err(|_| SosError::Config(format!("bad impact time '{}'", at)))?;
        let magnitude: f64 = magnitude
            .trim()
            .parse()
            .map_err(|_| SosError::Config(format!("bad impact magnitude '{}'", magnitude)))?;
        if at_secs < 0.0 || magnitude <= 0.0 {
            return Err(SosError::Config(format!("impact out of range: '{}'", text)));
        }
        Ok(Self { at_secs, magnitude })
    }
}

/// Synthetic accelerometer: gravity plus a small wobble, with an optional
/// impact lasting `IMPACT_WINDOW_SECS`.
pub struct MockMotion {
    t: f64,
    dt: f64,
    impact: Option<ScriptedImpact>,
}

const IMPACT_WINDOW_SECS: f64 = 0.1;

impl MockMotion {
    pub fn new(dt: f64, impact: Option<ScriptedImpact>) -> Self {
        Self { t: 0.0, dt, impact }
    }

    pub fn next_sample(&mut self) -> MotionSample {
        use std::f64::consts::PI;
        let t = self.t;
        self.t += self.dt;

        if let Some(impact) = self.impact {
            if t >= impact.at_secs && t < impact.at_secs + IMPACT_WINDOW_SECS {
                return MotionSample::new(0.0, 0.0, impact.magnitude);
            }
        }

        MotionSample::new(
            (t * 2.0 * PI).sin() * 0.5,
            (t * 2.0 * PI).cos() * 0.3,
            GRAVITY + (t * PI).sin() * 0.1,
        )
    }
}

/// Where the intake loop gets its samples.
pub enum SampleSource {
    /// Poll `termux-sensor`, falling back to mock data when it is missing.
    Termux(MockMotion),
    Mock(MockMotion),
}

/// Deliver samples at ~50Hz until the receiver goes away.
pub async fn accel_loop(tx: Sender<MotionSample>, mut source: SampleSource) {
    let mut interval = interval(Duration::from_millis(20));
    let mut sample_count = 0u64;

    loop {
        interval.tick().await;

        let sample = match &mut source {
            SampleSource::Termux(fallback) => match read_accelerometer().await {
                Some(sample) => sample,
                None => fallback.next_sample(),
            },
            SampleSource::Mock(mock) => mock.next_sample(),
        };

        match tx.try_send(sample) {
            Ok(_) => {
                sample_count += 1;
                if sample_count % 500 == 0 {
                    log::debug!("[accel] {} samples", sample_count);
                }
            }
            Err(TrySendError::Closed(_)) => {
                log::info!("[accel] Channel closed after {} samples", sample_count);
                break;
            }
            Err(TrySendError::Full(_)) => {
                // Channel full, drop this sample
            }
        }
    }
}

/// Feed a recorded log, preserving the recorded spacing between samples.
pub async fn replay_loop(tx: Sender<MotionSample>, samples: Vec<RecordedSample>) {
    let mut last_ts: Option<f64> = None;
    let total = samples.len();

    for recorded in samples {
        if let Some(prev) = last_ts {
            let gap = (recorded.timestamp - prev).max(0.0);
            if gap > 0.0 {
                match Duration::try_from_secs_f64(gap) {
                    Ok(wait) => sleep(wait).await,
                    Err(_) => log::warn!("[replay] Skipping unusable gap of {}s", gap),
                }
            }
        }
        last_ts = Some(recorded.timestamp);

        if tx.send(recorded.sample()).await.is_err() {
            log::info!("[replay] Channel closed, stopping replay");
            return;
        }
    }

    log::info!("[replay] Finished replaying {} samples", total);
}

#[derive(Deserialize)]
struct LoggedReading {
    timestamp: f64,
    accel: Option<RecordedSample>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReplayFile {
    Session { readings: Vec<LoggedReading> },
    Samples(Vec<RecordedSample>),
}

/// Load a replay log: either a bare array of samples or a session log with
/// `readings[].accel`. Files ending in `.gz` are decompressed.
pub fn load_replay(path: &Path) -> SosResult<Vec<RecordedSample>> {
    let file = File::open(path)?;
    let parsed: ReplayFile = if path.extension().map(|e| e == "gz").unwrap_or(false) {
        serde_json::from_reader(BufReader::new(GzDecoder::new(file)))?
    } else {
        serde_json::from_reader(BufReader::new(file))?
    };

    let samples = match parsed {
        ReplayFile::Samples(samples) => samples,
        ReplayFile::Session { readings } => readings
            .into_iter()
            .filter_map(|reading| {
                reading.accel.map(|mut accel| {
                    accel.timestamp = reading.timestamp;
                    accel
                })
            })
            .collect(),
    };
    Ok(samples)
}

async fn read_accelerometer() -> Option<MotionSample> {
    let output = Command::new("termux-sensor")
        .arg("-n")
        .arg("1")
        .arg("-s")
        .arg("accelerometer")
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_sensor_output(&String::from_utf8_lossy(&output.stdout))
}

/// termux-sensor prints `{"<sensor name>": {"values": [x, y, z]}}`.
fn parse_sensor_output(output: &str) -> Option<MotionSample> {
    let value: serde_json::Value = serde_json::from_str(output.trim()).ok()?;
    let sensors = value.as_object()?;

    for reading in sensors.values() {
        let values = match reading.get("values").and_then(|v| v.as_array()) {
            Some(values) if values.len() >= 3 => values,
            _ => continue,
        };
        let x = values[0].as_f64()?;
        let y = values[1].as_f64()?;
        let z = values[2].as_f64()?;
        return Some(MotionSample::new(x, y, z));
    }
    None
}
