use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::alert::AlertCounters;

/// The operator-facing indicator (LED / screen state on the device).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusIndicator {
    Idle,
    Armed,
    Warning,
    Alerting,
    Fault,
}

#[derive(Clone, Debug, Serialize)]
pub struct StatusReport {
    pub indicator: StatusIndicator,
    pub timestamp: String,
    pub uptime_seconds: f64,
    pub alert_phase: &'static str,
    pub active_event_id: Option<u64>,
    pub degraded: bool,
    // Sensor health
    pub sensor_faulted: bool,
    pub sensor_consecutive_failures: u32,
    pub sensor_total_failures: u64,
    // Pipeline counters
    pub samples: u64,
    pub windows_evaluated: u64,
    pub candidates: u64,
    pub last_confidence: Option<f32>,
    // Alert outcomes
    pub alerts: AlertCounters,
    // Inference latency
    pub inference_deadline_misses: u64,
    pub inference_worst_case_ms: f64,
}

/// Receives a report on every indicator transition (and periodically).
pub trait StatusSink {
    fn publish(&mut self, report: &StatusReport);
}

/// Writes the latest report as pretty JSON, overwriting the file each time.
pub struct LiveStatusFile {
    path: PathBuf,
    write_failures: u64,
}

impl LiveStatusFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_failures: 0 }
    }

    fn save(&self, report: &StatusReport) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(report)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

impl StatusSink for LiveStatusFile {
    fn publish(&mut self, report: &StatusReport) {
        if let Err(e) = self.save(report) {
            self.write_failures += 1;
            // one line per burst of failures, not one per tick
            if self.write_failures == 1 || self.write_failures % 100 == 0 {
                log::warn!("[STATUS] failed to write {}: {}", self.path.display(), e);
            }
        } else {
            self.write_failures = 0;
        }
    }
}

/// Logs indicator changes only.
#[derive(Default)]
pub struct LogStatusSink {
    last: Option<StatusIndicator>,
}

impl StatusSink for LogStatusSink {
    fn publish(&mut self, report: &StatusReport) {
        if self.last == Some(report.indicator) {
            return;
        }
        self.last = Some(report.indicator);
        match report.indicator {
            StatusIndicator::Fault => log::error!(
                "[STATUS] FAULT (sensor failures: {} consecutive, {} total)",
                report.sensor_consecutive_failures,
                report.sensor_total_failures
            ),
            StatusIndicator::Warning | StatusIndicator::Alerting => log::warn!(
                "[STATUS] {:?} ({}, event {:?})",
                report.indicator,
                report.alert_phase,
                report.active_event_id
            ),
            indicator => log::info!(
                "[STATUS] {:?}{}",
                indicator,
                if report.degraded { " (degraded detection)" } else { "" }
            ),
        }
    }
}

/// Fans a report out to several sinks.
impl<A: StatusSink, B: StatusSink> StatusSink for (A, B) {
    fn publish(&mut self, report: &StatusReport) {
        self.0.publish(report);
        self.1.publish(report);
    }
}

impl<T: StatusSink> StatusSink for Option<T> {
    fn publish(&mut self, report: &StatusReport) {
        if let Some(sink) = self {
            sink.publish(report);
        }
    }
}

#[cfg(test)]
#[derive(Default)]
pub(crate) struct MemorySink {
    pub reports: Vec<StatusReport>,
}

#[cfg(test)]
impl MemorySink {
    pub fn indicators(&self) -> Vec<StatusIndicator> {
        self.reports.iter().map(|r| r.indicator).collect()
    }
}

#[cfg(test)]
impl StatusSink for MemorySink {
    fn publish(&mut self, report: &StatusReport) {
        self.reports.push(report.clone());
    }
}
