use serde::Deserialize;
use serde_json::Value;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::Instant;

use super::SampleSource;
use crate::error::{LocationFault, SensorFault};
use crate::types::{Location, Reading, Sample};

const STANDARD_GRAVITY: f64 = 9.80665;

/// Phone sensors through Termux:API.
///
/// `termux-sensor` runs for the lifetime of the source and streams one JSON
/// object per sampling period; each `read` consumes exactly one object.
/// Android reports m/s² and rad/s, converted here to g and °/s.
pub struct TermuxSource {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    splitter: ObjectSplitter,
    started: Instant,
}

impl TermuxSource {
    pub fn spawn(sampling_rate_hz: f64) -> Result<Self, SensorFault> {
        let delay_ms = (1000.0 / sampling_rate_hz).round().max(1.0) as u64;
        let mut child = Command::new("termux-sensor")
            .args(["-s", "accelerometer,gyroscope", "-d"])
            .arg(delay_ms.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SensorFault::Unavailable(format!("termux-sensor: {}", e)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SensorFault::Unavailable("termux-sensor has no stdout".to_string()))?;

        log::info!("[SENSOR] termux-sensor streaming every {} ms", delay_ms);
        Ok(Self {
            child,
            lines: BufReader::new(stdout).lines(),
            splitter: ObjectSplitter::default(),
            started: Instant::now(),
        })
    }
}

impl Drop for TermuxSource {
    fn drop(&mut self) {
        if let Err(e) = self.child.start_kill() {
            log::warn!("[SENSOR] could not stop termux-sensor: {}", e);
        }
        // termux-sensor keeps the sensors powered until told to stop
        if let Err(e) = release_sensors("termux-sensor") {
            log::warn!("[SENSOR] termux-sensor -c failed: {}", e);
        }
    }
}

/// Runs `<program> -c` and reaps it on a helper thread so drop never blocks.
fn release_sensors(program: &str) -> std::io::Result<std::thread::JoinHandle<()>> {
    let mut cleanup = std::process::Command::new(program)
        .arg("-c")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(std::thread::spawn(move || match cleanup.wait() {
        Ok(status) if !status.success() => log::warn!("[SENSOR] sensor release exited with {}", status),
        Ok(_) => {}
        Err(e) => log::warn!("[SENSOR] sensor release not reaped: {}", e),
    }))
}

impl SampleSource for TermuxSource {
    async fn read(&mut self) -> Result<Reading, SensorFault> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| SensorFault::Unavailable(e.to_string()))?
                .ok_or_else(|| SensorFault::Unavailable("termux-sensor exited".to_string()))?;

            if let Some(object) = self.splitter.push_line(&line) {
                let timestamp = self.started.elapsed().as_secs_f64();
                let sample = parse_sensor_object(&object, timestamp)?;
                return Ok(Reading { sample, fix: None });
            }
        }
    }

    async fn read_location(&mut self) -> Result<Location, LocationFault> {
        let output = Command::new("termux-location")
            .args(["-p", "gps", "-r", "once"])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| LocationFault::Unavailable(format!("termux-location: {}", e)))?;
        parse_location(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Reassembles pretty-printed JSON objects from a line stream by tracking
/// brace depth.
#[derive(Default)]
struct ObjectSplitter {
    buffer: String,
    depth: i32,
}

impl ObjectSplitter {
    fn push_line(&mut self, line: &str) -> Option<String> {
        for c in line.chars() {
            match c {
                '{' => self.depth += 1,
                '}' => self.depth -= 1,
                _ => {}
            }
        }
        if self.depth < 0 {
            // joined mid-object; start over
            self.depth = 0;
            self.buffer.clear();
            return None;
        }
        self.buffer.push_str(line);
        self.buffer.push('\n');
        if self.depth > 0 {
            return None;
        }
        let text = std::mem::take(&mut self.buffer);
        text.contains('{').then_some(text)
    }
}

fn parse_sensor_object(text: &str, timestamp: f64) -> Result<Sample, SensorFault> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| SensorFault::Malformed(e.to_string()))?;
    let sensors = value
        .as_object()
        .ok_or_else(|| SensorFault::Malformed("expected a JSON object".to_string()))?;

    let mut accel = None;
    let mut gyro = None;
    // keys are vendor names, e.g. "BMI160 Accelerometer"
    for (name, entry) in sensors {
        let name = name.to_ascii_lowercase();
        let values = entry.get("values").and_then(Value::as_array).and_then(|v| xyz(v));
        if name.contains("accelerometer") && !name.contains("uncalibrated") {
            accel = values;
        } else if name.contains("gyroscope") && !name.contains("uncalibrated") {
            gyro = values;
        }
    }

    let [ax, ay, az] =
        accel.ok_or_else(|| SensorFault::Malformed("no accelerometer values".to_string()))?;
    let [gx, gy, gz] = gyro.ok_or_else(|| SensorFault::Malformed("no gyroscope values".to_string()))?;
    Ok(Sample {
        timestamp,
        ax: ax / STANDARD_GRAVITY,
        ay: ay / STANDARD_GRAVITY,
        az: az / STANDARD_GRAVITY,
        gx: gx.to_degrees(),
        gy: gy.to_degrees(),
        gz: gz.to_degrees(),
    })
}

fn xyz(values: &[Value]) -> Option<[f64; 3]> {
    match values {
        [x, y, z, ..] => Some([x.as_f64()?, y.as_f64()?, z.as_f64()?]),
        _ => None,
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TermuxLocation {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    elapsed_ms: Option<f64>,
}

fn parse_location(text: &str) -> Result<Location, LocationFault> {
    if text.trim().is_empty() {
        return Err(LocationFault::NoFix);
    }
    let fix: TermuxLocation =
        serde_json::from_str(text).map_err(|e| LocationFault::Unavailable(e.to_string()))?;
    Ok(Location {
        lat: fix.latitude,
        lon: fix.longitude,
        fix_valid: true,
        age_secs: fix.elapsed_ms.unwrap_or(0.0) / 1000.0,
    })
}
