use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Upper bound on the fusion window; keeps the model input and the ring
/// buffer within the device's RAM budget.
pub const MAX_WINDOW_SIZE: usize = 1024;

/// Supported tick rates. Above the maximum the tick period is shorter than
/// one sensor read can take.
pub const MIN_SAMPLING_RATE_HZ: f64 = 1.0;
pub const MAX_SAMPLING_RATE_HZ: f64 = 1000.0;

/// Ceiling for every second-valued setting. Keeps timeouts and deadlines
/// representable as `Duration` and in the same range as the loop clock.
pub const MAX_SECONDS: f64 = 24.0 * 3600.0;

// ─── Configuration ───────────────────────────────────────────────────────────

/// Startup parameters. Immutable once the coordinator is built.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorConfig {
    // ── Sampling / fusion ──
    pub window_size: usize,
    pub sampling_rate_hz: f64,
    pub sensor_read_timeout_ms: u64,
    pub sensor_fault_limit: u32,

    // ── Sensor full-scale (used when the model artifact is unavailable) ──
    pub accel_range_g: f64,
    pub gyro_range_dps: f64,

    // ── Inference ──
    pub model_path: PathBuf,
    pub inference_budget_ms: u64,
    pub degraded_accel_threshold_g: f64,

    // ── Decision policy ──
    pub confidence_threshold: f32,
    pub confidence_threshold_high: f32,
    pub hysteresis_count: u32,

    // ── Alerting ──
    pub override_delay_s: f64,
    pub cooldown_s: f64,
    pub recipient: String,
    pub dispatch_retry_count: u32,
    pub dispatch_timeout_s: f64,
    pub dispatch_backoff_base_s: f64,
    pub dispatch_backoff_max_s: f64,
    pub location_timeout_s: f64,
    pub location_max_age_s: f64,

    // ── Outputs ──
    pub status_path: Option<PathBuf>,
    pub backend_url: Option<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_size: 50,
            sampling_rate_hz: 50.0,
            sensor_read_timeout_ms: 100,
            sensor_fault_limit: 10,
            accel_range_g: 2.0,
            gyro_range_dps: 250.0,
            model_path: PathBuf::from("models/accident_model.json"),
            inference_budget_ms: 50,
            degraded_accel_threshold_g: 4.0,
            confidence_threshold: 0.7,
            confidence_threshold_high: 0.95,
            hysteresis_count: 3,
            override_delay_s: 15.0,
            cooldown_s: 30.0,
            recipient: "+1234567890".to_string(),
            dispatch_retry_count: 3,
            dispatch_timeout_s: 10.0,
            dispatch_backoff_base_s: 2.0,
            dispatch_backoff_max_s: 30.0,
            location_timeout_s: 5.0,
            location_max_age_s: 300.0,
            status_path: None,
            backend_url: None,
        }
    }
}

impl DetectorConfig {
    /// Reads a JSON config file. Missing keys fall back to the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Checks every field once; a config that passes is safe for the
    /// lifetime of the process.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.window_size == 0 || self.window_size > MAX_WINDOW_SIZE {
            return Err(ConfigError::invalid(
                "window_size",
                format!("must be in 1..={}", MAX_WINDOW_SIZE),
            ));
        }
        if !(MIN_SAMPLING_RATE_HZ..=MAX_SAMPLING_RATE_HZ).contains(&self.sampling_rate_hz) {
            return Err(ConfigError::invalid(
                "sampling_rate_hz",
                format!("must be in [{}, {}]", MIN_SAMPLING_RATE_HZ, MAX_SAMPLING_RATE_HZ),
            ));
        }
        if self.sensor_read_timeout_ms == 0 {
            return Err(ConfigError::invalid("sensor_read_timeout_ms", "must be non-zero"));
        }
        if self.sensor_fault_limit == 0 {
            return Err(ConfigError::invalid("sensor_fault_limit", "must be at least 1"));
        }
        if !(self.accel_range_g > 0.0 && self.gyro_range_dps > 0.0) {
            return Err(ConfigError::invalid("accel_range_g", "sensor ranges must be positive"));
        }
        if self.inference_budget_ms == 0 {
            return Err(ConfigError::invalid("inference_budget_ms", "must be non-zero"));
        }
        if !(self.degraded_accel_threshold_g.is_finite() && self.degraded_accel_threshold_g > 1.0) {
            return Err(ConfigError::invalid(
                "degraded_accel_threshold_g",
                "must exceed 1 g or gravity alone would trigger",
            ));
        }
        let (t, t_high) = (self.confidence_threshold, self.confidence_threshold_high);
        if !(0.0..1.0).contains(&t) {
            return Err(ConfigError::invalid("confidence_threshold", "must be in [0, 1)"));
        }
        if !(t_high > t && t_high <= 1.0) {
            return Err(ConfigError::invalid(
                "confidence_threshold_high",
                format!("must be in ({}, 1]", t),
            ));
        }
        if self.hysteresis_count == 0 {
            return Err(ConfigError::invalid("hysteresis_count", "must be at least 1"));
        }
        for (field, value) in [
            ("override_delay_s", self.override_delay_s),
            ("cooldown_s", self.cooldown_s),
            ("dispatch_backoff_base_s", self.dispatch_backoff_base_s),
            ("dispatch_backoff_max_s", self.dispatch_backoff_max_s),
            ("location_max_age_s", self.location_max_age_s),
        ] {
            if !(0.0..=MAX_SECONDS).contains(&value) {
                return Err(ConfigError::invalid(field, format!("must be in [0, {}] seconds", MAX_SECONDS)));
            }
        }
        if self.recipient.trim().is_empty() {
            return Err(ConfigError::invalid("recipient", "must not be empty"));
        }
        if self.dispatch_retry_count == 0 {
            return Err(ConfigError::invalid("dispatch_retry_count", "must be at least 1"));
        }
        for (field, value) in [
            ("dispatch_timeout_s", self.dispatch_timeout_s),
            ("location_timeout_s", self.location_timeout_s),
        ] {
            if !(value > 0.0 && value <= MAX_SECONDS) {
                return Err(ConfigError::invalid(field, format!("must be in (0, {}] seconds", MAX_SECONDS)));
            }
        }
        if self.dispatch_backoff_max_s < self.dispatch_backoff_base_s {
            return Err(ConfigError::invalid(
                "dispatch_backoff_max_s",
                "must be >= dispatch_backoff_base_s",
            ));
        }
        if self.tick_interval().is_zero() {
            return Err(ConfigError::invalid("sampling_rate_hz", "tick period rounds to zero"));
        }
        Ok(self)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.sampling_rate_hz)
    }

    /// Per-read wait inside one modem exchange. A send is several round
    /// trips and all of them have to fit in `dispatch_timeout_s`.
    pub fn modem_response_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.dispatch_timeout_s / 4.0)
    }

    pub fn sensor_read_timeout(&self) -> Duration {
        Duration::from_millis(self.sensor_read_timeout_ms)
    }

    pub fn inference_budget(&self) -> Duration {
        Duration::from_millis(self.inference_budget_ms)
    }
}
