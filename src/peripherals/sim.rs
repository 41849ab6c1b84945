use std::f64::consts::PI;
use std::ops::Range;

use super::{Dispatcher, SampleSource};
use crate::error::{DispatchFault, LocationFault, SensorFault};
use crate::types::{Location, Reading, Sample};

/// Length of an injected impact.
pub const CRASH_DURATION_S: f64 = 0.2;

/// Deterministic driving signal for bench testing: gravity on z, a gentle
/// sway on x/y, a slow yaw, and a mock GPS track at 1 Hz.
///
/// Time is the sample clock (`seq / rate`), not the wall clock, so two runs
/// produce identical streams.
pub struct SimulatedSource {
    rate_hz: f64,
    seq: u64,
    crash_at: Option<f64>,
    dropout: Option<Range<f64>>,
    gps_enabled: bool,
}

impl SimulatedSource {
    pub fn new(rate_hz: f64) -> Self {
        Self { rate_hz, seq: 0, crash_at: None, dropout: None, gps_enabled: true }
    }

    /// Injects a >8 g impact lasting 200 ms starting at `t` seconds.
    pub fn with_crash_at(mut self, t: f64) -> Self {
        self.crash_at = Some(t);
        self
    }

    /// Every read inside `window` (sample-clock seconds) fails.
    pub fn with_dropout(mut self, window: Range<f64>) -> Self {
        self.dropout = Some(window);
        self
    }

    pub fn without_gps(mut self) -> Self {
        self.gps_enabled = false;
        self
    }

    fn clock(&self) -> f64 {
        self.seq as f64 / self.rate_hz
    }

    fn sample_at(&self, t: f64) -> Sample {
        let mut sample = Sample {
            timestamp: t,
            ax: (t * 2.0 * PI).sin() * 0.05,
            ay: (t * 2.0 * PI).cos() * 0.03,
            az: 1.0 + (t * PI).sin() * 0.01,
            gx: (t * 0.5).sin() * 3.0,
            gy: (t * 0.3).cos() * 2.0,
            gz: (t * 1.0).sin() * 6.0,
        };

        if let Some(start) = self.crash_at {
            if t >= start && t < start + CRASH_DURATION_S {
                // frontal impact with some rotation
                let phase = (t - start) / CRASH_DURATION_S * PI;
                sample.ax = -9.0 - 3.0 * phase.sin();
                sample.ay = 2.5 * phase.sin();
                sample.az = 1.0 + 1.5 * phase.sin();
                sample.gx = 180.0 * phase.sin();
                sample.gz = -240.0 * phase.sin();
            }
        }
        sample
    }

    fn mock_fix(&self, t: f64) -> Location {
        let step = t.floor();
        Location {
            lat: 37.7749 + step * 0.00001,
            lon: -122.4194 + step * 0.00001,
            fix_valid: true,
            age_secs: t - step,
        }
    }
}

impl SampleSource for SimulatedSource {
    async fn read(&mut self) -> Result<Reading, SensorFault> {
        let t = self.clock();
        self.seq += 1;

        if self.dropout.as_ref().is_some_and(|w| w.contains(&t)) {
            return Err(SensorFault::Unavailable("simulated dropout".to_string()));
        }

        let at_second = self.seq % (self.rate_hz.round().max(1.0) as u64) == 1;
        let fix = (self.gps_enabled && at_second).then(|| self.mock_fix(t));
        Ok(Reading { sample: self.sample_at(t), fix })
    }

    async fn read_location(&mut self) -> Result<Location, LocationFault> {
        if !self.gps_enabled {
            return Err(LocationFault::NoFix);
        }
        Ok(self.mock_fix(self.clock()))
    }
}

/// Prints the message instead of sending it. Always acknowledges.
#[derive(Default)]
pub struct LogDispatcher {
    pub sent: Vec<String>,
}

impl Dispatcher for LogDispatcher {
    async fn send(&mut self, recipient: &str, text: &str) -> Result<(), DispatchFault> {
        log::warn!("[SMS] to {}: {}", recipient, text);
        self.sent.push(text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(source: &mut SimulatedSource, n: usize) -> Vec<Result<Reading, SensorFault>> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(source.read().await);
        }
        out
    }

    #[tokio::test]
    async fn test_baseline_is_about_one_g() {
        let mut source = SimulatedSource::new(50.0);
        for reading in collect(&mut source, 200).await {
            let mag = reading.unwrap().sample.accel_magnitude();
            assert!((0.9..1.1).contains(&mag), "magnitude {}", mag);
        }
    }

    #[tokio::test]
    async fn test_crash_spike_lasts_200ms() {
        let mut source = SimulatedSource::new(50.0).with_crash_at(2.0);
        let readings = collect(&mut source, 200).await;

        let spiked: Vec<f64> = readings
            .iter()
            .map(|r| r.as_ref().unwrap().sample)
            .filter(|s| s.accel_magnitude() > 8.0)
            .map(|s| s.timestamp)
            .collect();
        assert_eq!(spiked.len(), 10);
        assert!((spiked[0] - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_gps_fix_once_per_second() {
        let mut source = SimulatedSource::new(50.0);
        let fixes = collect(&mut source, 150)
            .await
            .into_iter()
            .filter(|r| r.as_ref().unwrap().fix.is_some())
            .count();
        assert_eq!(fixes, 3);
    }

    #[tokio::test]
    async fn test_dropout_window_fails_reads() {
        let mut source = SimulatedSource::new(10.0).with_dropout(0.5..1.0);
        let readings = collect(&mut source, 15).await;
        let failed = readings.iter().filter(|r| r.is_err()).count();
        assert_eq!(failed, 5);
    }

    #[tokio::test]
    async fn test_log_dispatcher_acknowledges() {
        let mut dispatcher = LogDispatcher::default();
        dispatcher.send("+1", "hello").await.unwrap();
        assert_eq!(dispatcher.sent, vec!["hello".to_string()]);
    }
}
