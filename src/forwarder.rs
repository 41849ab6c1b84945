use serde::Serialize;
use std::time::Duration;

use crate::types::{AlertEvent, AlertStatus, Sample};

/// Body of one accident record, in the persistence API's field names.
#[derive(Clone, Debug, Serialize)]
pub struct AccidentRecord {
    pub event_id: u64,
    pub timestamp: String,
    pub latitude: f64,
    pub longitude: f64,
    pub location_stale: bool,
    pub acceleration_x: f64,
    pub acceleration_y: f64,
    pub acceleration_z: f64,
    pub gyroscope_x: f64,
    pub gyroscope_y: f64,
    pub gyroscope_z: f64,
    pub confidence_score: f32,
    pub status: AlertStatus,
    pub is_confirmed: bool,
    pub dispatch_attempts: u32,
}

impl AccidentRecord {
    /// `peak` is the strongest sample of the window that triggered the event.
    pub fn new(event: &AlertEvent, peak: Option<&Sample>) -> Self {
        let peak = peak.copied().unwrap_or_default();
        let (latitude, longitude) = event.location.map(|l| (l.lat, l.lon)).unwrap_or((0.0, 0.0));
        Self {
            event_id: event.id,
            timestamp: event.detected_wall.clone(),
            latitude,
            longitude,
            location_stale: event.location_stale,
            acceleration_x: peak.ax,
            acceleration_y: peak.ay,
            acceleration_z: peak.az,
            gyroscope_x: peak.gx,
            gyroscope_y: peak.gy,
            gyroscope_z: peak.gz,
            confidence_score: event.confidence,
            status: event.status,
            // the user let the override window lapse
            is_confirmed: event.status == AlertStatus::Dispatched,
            dispatch_attempts: event.dispatch_attempts,
        }
    }
}

/// Fire-and-forget hand-off of finished events to the backend.
///
/// Each POST runs in its own detached task; the control loop never waits on
/// the network and failures only show up in the log.
#[derive(Clone)]
pub struct EventForwarder {
    client: reqwest::Client,
    endpoint: String,
}

impl EventForwarder {
    pub fn new(backend_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(concat!("accident-detector/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, endpoint: Self::endpoint_for(backend_url) }
    }

    fn endpoint_for(backend_url: &str) -> String {
        format!("{}/api/v1/accidents/", backend_url.trim_end_matches('/'))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Must be called from within a tokio runtime.
    pub fn forward(&self, event: &AlertEvent, peak: Option<&Sample>) {
        let record = AccidentRecord::new(event, peak);
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();

        tokio::spawn(async move {
            match client.post(&endpoint).json(&record).send().await {
                Ok(resp) if resp.status().is_success() => {
                    log::info!("[FORWARD] ✓ event {} stored", record.event_id);
                }
                Ok(resp) => {
                    log::warn!("[FORWARD] event {} rejected: HTTP {}", record.event_id, resp.status());
                }
                Err(e) => {
                    log::warn!("[FORWARD] event {} not delivered: {}", record.event_id, e);
                }
            }
        });
    }
}
