use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// One raw 6-axis reading. Acceleration in g, angular rate in deg/s,
/// timestamp in monotonic seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: f64,
    pub ax: f64,
    pub ay: f64,
    pub az: f64,
    pub gx: f64,
    pub gy: f64,
    pub gz: f64,
}

impl Sample {
    pub fn accel(&self) -> Vector3<f64> {
        Vector3::new(self.ax, self.ay, self.az)
    }

    pub fn gyro(&self) -> Vector3<f64> {
        Vector3::new(self.gx, self.gy, self.gz)
    }

    pub fn accel_magnitude(&self) -> f64 {
        self.accel().norm()
    }

    /// Channel values in model order: ax, ay, az, gx, gy, gz.
    pub fn channels(&self) -> [f64; CHANNELS] {
        [self.ax, self.ay, self.az, self.gx, self.gy, self.gz]
    }
}

pub const CHANNELS: usize = 6;

/// A GPS position as reported by the location collaborator.
///
/// `age_secs` is how old the fix already was when it was handed over;
/// `fix_valid == false` means the receiver had no usable position.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    pub fix_valid: bool,
    pub age_secs: f64,
}

impl Location {
    pub fn fresh(lat: f64, lon: f64) -> Self {
        Self { lat, lon, fix_valid: true, age_secs: 0.0 }
    }

    pub fn map_link(&self) -> String {
        format!("https://www.google.com/maps?q={:.6},{:.6}", self.lat, self.lon)
    }
}

/// One periodic reading from the sample source.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Reading {
    pub sample: Sample,
    #[serde(default)]
    pub fix: Option<Location>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct InferenceResult {
    /// Always within [0, 1].
    pub confidence: f32,
    pub at: f64,
}

/// Lifecycle of one alert. Ranks only ever increase; the last three are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Candidate,
    OverrideWindow,
    Dispatching,
    Dispatched,
    DispatchFailed,
    Cancelled,
}

impl AlertStatus {
    fn rank(self) -> u8 {
        match self {
            AlertStatus::Candidate => 0,
            AlertStatus::OverrideWindow => 1,
            AlertStatus::Dispatching => 2,
            AlertStatus::Dispatched | AlertStatus::DispatchFailed | AlertStatus::Cancelled => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 3
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: u64,
    /// Monotonic detection time (seconds since the coordinator started).
    pub detected_at: f64,
    /// Wall-clock detection time, RFC 3339.
    pub detected_wall: String,
    pub confidence: f32,
    pub status: AlertStatus,
    pub location: Option<Location>,
    /// Set when the fresh fix request failed and an older fix was used.
    pub location_stale: bool,
    pub dispatch_attempts: u32,
}

impl AlertEvent {
    /// Moves the event forward. Returns false (and leaves the event untouched)
    /// for backward moves or any move out of a terminal status.
    pub fn advance(&mut self, next: AlertStatus) -> bool {
        if self.status.is_terminal() || next.rank() <= self.status.rank() {
            return false;
        }
        self.status = next;
        true
    }

    pub fn is_live(&self) -> bool {
        !self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> AlertEvent {
        AlertEvent {
            id: 1,
            detected_at: 0.0,
            detected_wall: String::new(),
            confidence: 0.9,
            status: AlertStatus::Candidate,
            location: None,
            location_stale: false,
            dispatch_attempts: 0,
        }
    }

    #[test]
    fn test_status_is_monotonic() {
        let mut ev = event();
        assert!(ev.advance(AlertStatus::OverrideWindow));
        assert!(!ev.advance(AlertStatus::Candidate));
        assert!(ev.advance(AlertStatus::Dispatching));
        assert!(ev.advance(AlertStatus::Dispatched));
        assert!(!ev.is_live());

        // terminal is immutable
        assert!(!ev.advance(AlertStatus::DispatchFailed));
        assert_eq!(ev.status, AlertStatus::Dispatched);
    }

    #[test]
    fn test_accel_magnitude() {
        let s = Sample { timestamp: 0.0, ax: 3.0, ay: 4.0, az: 0.0, ..Default::default() };
        assert!((s.accel_magnitude() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_map_link() {
        let loc = Location::fresh(40.7128, -74.006);
        assert_eq!(loc.map_link(), "https://www.google.com/maps?q=40.712800,-74.006000");
    }
}
