//! Collaborator boundaries: the motion/GPS source and the message dispatcher.
//!
//! Backends are plain types implementing these traits and are picked at
//! build time (see the `hardware` feature in `main.rs`). The control loop
//! enforces its own timeouts around every call, so an implementation that
//! hangs can only cost one bounded wait.

use std::future::Future;

use crate::error::{DispatchFault, LocationFault, SensorFault};
use crate::types::{Location, Reading};

pub mod replay;
pub mod sim;
pub mod sim7000;
pub mod termux;

#[cfg(test)]
pub(crate) mod testing;

pub trait SampleSource {
    /// One 6-axis reading, optionally with a GPS fix piggy-backed.
    fn read(&mut self) -> impl Future<Output = Result<Reading, SensorFault>>;

    /// Explicit fix request used right before dispatching an alert.
    fn read_location(&mut self) -> impl Future<Output = Result<Location, LocationFault>>;
}

pub trait Dispatcher {
    /// Sends `text` to `recipient` and waits for the acknowledgement.
    fn send(&mut self, recipient: &str, text: &str) -> impl Future<Output = Result<(), DispatchFault>>;
}

/// A backend that may have failed to come up at startup.
///
/// An offline peripheral answers every call with a fault instead of taking
/// the process down: an offline sensor ends in the FAULT latch and an
/// offline modem ends alerts in DISPATCH_FAILED.
pub enum Peripheral<T> {
    Online(T),
    Offline(String),
}

impl<T> Peripheral<T> {
    pub fn from_result<E: std::fmt::Display>(name: &str, result: Result<T, E>) -> Self {
        match result {
            Ok(inner) => Peripheral::Online(inner),
            Err(e) => {
                log::error!("[PERIPH] ✗ {} unavailable: {}", name, e);
                Peripheral::Offline(format!("{}: {}", name, e))
            }
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, Peripheral::Online(_))
    }

    /// The reason this peripheral is offline, if it is.
    pub fn offline_reason(&self) -> Option<&str> {
        match self {
            Peripheral::Online(_) => None,
            Peripheral::Offline(reason) => Some(reason),
        }
    }
}

impl<T: SampleSource> SampleSource for Peripheral<T> {
    async fn read(&mut self) -> Result<Reading, SensorFault> {
        match self {
            Peripheral::Online(source) => source.read().await,
            Peripheral::Offline(reason) => Err(SensorFault::Unavailable(reason.clone())),
        }
    }

    async fn read_location(&mut self) -> Result<Location, LocationFault> {
        match self {
            Peripheral::Online(source) => source.read_location().await,
            Peripheral::Offline(reason) => Err(LocationFault::Unavailable(reason.clone())),
        }
    }
}

impl<T: Dispatcher> Dispatcher for Peripheral<T> {
    async fn send(&mut self, recipient: &str, text: &str) -> Result<(), DispatchFault> {
        match self {
            Peripheral::Online(dispatcher) => dispatcher.send(recipient, text).await,
            Peripheral::Offline(reason) => Err(DispatchFault::Link(reason.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertConfig, AlertController};
    use crate::config::DetectorConfig;
    use crate::decision::{CandidateEvent, Trigger};
    use crate::types::AlertStatus;
    use super::testing::{ScriptedDispatcher, ScriptedSource};

    #[tokio::test]
    async fn test_offline_source_reports_unavailable() {
        let result: Result<ScriptedSource, String> = Err("termux-sensor: not found".to_string());
        let mut source = Peripheral::from_result("motion sensor", result);
        assert!(!source.is_online());
        assert_eq!(source.offline_reason(), Some("motion sensor: termux-sensor: not found"));
        assert!(matches!(source.read().await, Err(SensorFault::Unavailable(_))));
        assert!(matches!(source.read_location().await, Err(LocationFault::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_offline_modem_fails_alert_without_exiting() {
        let config = DetectorConfig {
            dispatch_backoff_base_s: 0.0,
            dispatch_backoff_max_s: 0.0,
            ..Default::default()
        };
        let missing: Result<ScriptedDispatcher, _> = Err("/dev/ttyUSB0: No such file");
        let dispatcher = Peripheral::from_result("modem", missing);
        let mut alert = AlertController::new(AlertConfig::from(&config), dispatcher);
        let mut source = ScriptedSource::new();

        let candidate =
            CandidateEvent { confidence: 0.99, detected_at: 0.0, trigger: Trigger::Certain, qualifying_windows: 1 };
        alert.raise(&candidate, 0.0);
        let mut finished = None;
        let mut now = 15.0;
        while finished.is_none() && now < 20.0 {
            finished = alert.advance(now, &mut source, None).await;
            now += 0.02;
        }

        let event = finished.unwrap();
        assert_eq!(event.status, AlertStatus::DispatchFailed);
        assert_eq!(event.dispatch_attempts, config.dispatch_retry_count);
    }

    #[tokio::test]
    async fn test_online_peripheral_passes_through() {
        let mut dispatcher = Peripheral::Online(ScriptedDispatcher::ok());
        dispatcher.send("+1", "hi").await.unwrap();
        let Peripheral::Online(inner) = &dispatcher else { panic!("went offline") };
        assert_eq!(inner.sent.len(), 1);
    }
}
