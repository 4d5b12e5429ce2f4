use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::process::Command;

use crate::error::LocationError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoFix {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn maps_link(&self) -> String {
        format!(
            "http://maps.google.com/maps?q={:?},{:?}",
            self.latitude, self.longitude
        )
    }
}

/// Position provider. Implementations own their timeout and retry policy.
#[async_trait]
pub trait LocationSource: Send + Sync {
    /// Cached fix, if the provider has one. `Ok(None)` means "ask for a
    /// fresh one".
    async fn last_known_fix(&self) -> Result<Option<GeoFix>, LocationError>;

    /// Request a single new fix.
    async fn fresh_fix(&self) -> Result<GeoFix, LocationError>;

    /// Last-known fix, falling back to one fresh request. Permission
    /// denial never falls back.
    async fn last_or_fresh_fix(&self) -> Result<GeoFix, LocationError> {
        match self.last_known_fix().await {
            Ok(Some(fix)) => Ok(fix),
            Ok(None) => self.fresh_fix().await,
            Err(LocationError::PermissionDenied) => Err(LocationError::PermissionDenied),
            Err(err) => {
                log::warn!("[LOCATION] Last known fix failed ({}), requesting a fresh one", err);
                self.fresh_fix().await
            }
        }
    }

    /// Accuracy in meters of the most recent fix, for status display.
    fn last_accuracy(&self) -> Option<f64> {
        None
    }
}

/// Always reports the same position. Used by the CLI with `--lat/--lon`.
pub struct FixedLocationSource {
    fix: Option<GeoFix>,
}

impl FixedLocationSource {
    pub fn new(fix: GeoFix) -> Self {
        Self { fix: Some(fix) }
    }

    /// A source that never gets a fix.
    pub fn unavailable() -> Self {
        Self { fix: None }
    }
}

#[async_trait]
impl LocationSource for FixedLocationSource {
    async fn last_known_fix(&self) -> Result<Option<GeoFix>, LocationError> {
        Ok(self.fix)
    }

    async fn fresh_fix(&self) -> Result<GeoFix, LocationError> {
        self.fix
            .ok_or_else(|| LocationError::Unavailable("no fixed position configured".to_string()))
    }
}

#[derive(Deserialize)]
struct TermuxFix {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    accuracy: Option<f64>,
}

/// Location through Termux:API's `termux-location`.
pub struct TermuxLocationSource {
    provider: String,
    accuracy: Mutex<Option<f64>>,
}

impl TermuxLocationSource {
    pub fn new() -> Self {
        Self {
            provider: "gps".to_string(),
            accuracy: Mutex::new(None),
        }
    }

    async fn request(&self, mode: &str) -> Result<Option<GeoFix>, LocationError> {
        let output = Command::new("termux-location")
            .arg("-p")
            .arg(&self.provider)
            .arg("-r")
            .arg(mode)
            .output()
            .await
            .map_err(|e| LocationError::Unavailable(format!("termux-location: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.to_lowercase().contains("permission") || stdout.to_lowercase().contains("permission") {
            return Err(LocationError::PermissionDenied);
        }
        if !output.status.success() {
            return Err(LocationError::Unavailable(stderr.trim().to_string()));
        }

        let text = stdout.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let fix: TermuxFix = serde_json::from_str(text)
            .map_err(|e| LocationError::Unavailable(format!("unreadable fix: {}", e)))?;

        if let Ok(mut accuracy) = self.accuracy.lock() {
            *accuracy = fix.accuracy;
        }
        Ok(Some(GeoFix::new(fix.latitude, fix.longitude)))
    }
}

impl Default for TermuxLocationSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocationSource for TermuxLocationSource {
    async fn last_known_fix(&self) -> Result<Option<GeoFix>, LocationError> {
        self.request("last").await
    }

    async fn fresh_fix(&self) -> Result<GeoFix, LocationError> {
        self.request("once")
            .await?
            .ok_or_else(|| LocationError::Unavailable("empty response".to_string()))
    }

    fn last_accuracy(&self) -> Option<f64> {
        self.accuracy.lock().ok().and_then(|a| *a)
    }
}

/// Coarse GPS quality shown next to the monitor status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GpsSignal {
    Searching,
    Low,
    Medium,
    High,
}

impl GpsSignal {
    pub fn from_accuracy(accuracy_m: f64) -> Self {
        if accuracy_m > 50.0 {
            GpsSignal::Low
        } else if accuracy_m > 10.0 {
            GpsSignal::Medium
        } else if accuracy_m > 0.0 {
            GpsSignal::High
        } else {
            GpsSignal::Searching
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedSource {
        last: Result<Option<GeoFix>, LocationError>,
        fresh: Result<GeoFix, LocationError>,
        fresh_calls: AtomicUsize,
    }

    #[async_trait]
    impl LocationSource for ScriptedSource {
        async fn last_known_fix(&self) -> Result<Option<GeoFix>, LocationError> {
            self.last.clone()
        }

        async fn fresh_fix(&self) -> Result<GeoFix, LocationError> {
            self.fresh_calls.fetch_add(1, Ordering::SeqCst);
            self.fresh.clone()
        }
    }

    fn scripted(
        last: Result<Option<GeoFix>, LocationError>,
        fresh: Result<GeoFix, LocationError>,
    ) -> ScriptedSource {
        ScriptedSource {
            last,
            fresh,
            fresh_calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn test_last_known_fix_preferred() {
        let source = scripted(Ok(Some(GeoFix::new(1.0, 2.0))), Ok(GeoFix::new(9.0, 9.0)));
        assert_eq!(source.last_or_fresh_fix().await, Ok(GeoFix::new(1.0, 2.0)));
        assert_eq!(source.fresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_falls_back_to_fresh_fix() {
        let source = scripted(Ok(None), Ok(GeoFix::new(3.0, 4.0)));
        assert_eq!(source.last_or_fresh_fix().await, Ok(GeoFix::new(3.0, 4.0)));
        assert_eq!(source.fresh_calls.load(Ordering::SeqCst), 1);

        let source = scripted(
            Err(LocationError::Unavailable("stale".to_string())),
            Ok(GeoFix::new(5.0, 6.0)),
        );
        assert_eq!(source.last_or_fresh_fix().await, Ok(GeoFix::new(5.0, 6.0)));
    }

    #[tokio::test]
    async fn test_permission_denied_does_not_fall_back() {
        let source = scripted(Err(LocationError::PermissionDenied), Ok(GeoFix::new(5.0, 6.0)));
        assert_eq!(
            source.last_or_fresh_fix().await,
            Err(LocationError::PermissionDenied)
        );
        assert_eq!(source.fresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fixed_source() {
        let source = FixedLocationSource::new(GeoFix::new(1.0, 2.0));
        assert_eq!(source.last_or_fresh_fix().await, Ok(GeoFix::new(1.0, 2.0)));

        let source = FixedLocationSource::unavailable();
        assert!(matches!(
            source.last_or_fresh_fix().await,
            Err(LocationError::Unavailable(_))
        ));
    }

    #[test]
    fn test_maps_link() {
        let fix = GeoFix::new(1.5, -2.25);
        assert_eq!(fix.maps_link(), "http://maps.google.com/maps?q=1.5,-2.25");

        // Whole degrees keep their decimal point
        let fix = GeoFix::new(1.0, 2.0);
        assert_eq!(fix.maps_link(), "http://maps.google.com/maps?q=1.0,2.0");
    }

    #[test]
    fn test_gps_signal_levels() {
        assert_eq!(GpsSignal::from_accuracy(0.0), GpsSignal::Searching);
        assert_eq!(GpsSignal::from_accuracy(4.0), GpsSignal::High);
        assert_eq!(GpsSignal::from_accuracy(10.0), GpsSignal::High);
        assert_eq!(GpsSignal::from_accuracy(25.0), GpsSignal::Medium);
        assert_eq!(GpsSignal::from_accuracy(80.0), GpsSignal::Low);
    }
}
