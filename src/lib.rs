//! On-device accident detection: fixed-window sensor fusion, a quantized
//! sequence model behind a latency budget, a hysteresis decision policy and
//! a cancellable alert dispatch state machine, driven by one control loop.

pub mod alert;
pub mod backoff;
pub mod config;
pub mod coordinator;
pub mod decision;
pub mod error;
pub mod forwarder;
pub mod fusion_window;
pub mod inference;
pub mod model;
pub mod normalizer;
pub mod peripherals;
pub mod sensor_health;
pub mod signals;
pub mod status;
pub mod types;

pub use config::DetectorConfig;
pub use coordinator::{Coordinator, RunSummary};
pub use types::{AlertEvent, AlertStatus, Location, Sample};
