//! Scripted collaborators for unit tests.

use std::collections::VecDeque;
use std::future::pending;

use super::{Dispatcher, SampleSource};
use crate::error::{DispatchFault, LocationFault, SensorFault};
use crate::types::{Location, Reading, Sample};

/// Plays back a fixed list of read results, then reports `Exhausted`.
pub struct ScriptedSource {
    pub reads: VecDeque<Result<Reading, SensorFault>>,
    pub location: Result<Location, LocationFault>,
    pub location_requests: u32,
    /// When set, `read_location` never resolves.
    pub hang_location: bool,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            reads: VecDeque::new(),
            location: Ok(Location::fresh(40.7128, -74.006)),
            location_requests: 0,
            hang_location: false,
        }
    }

    pub fn with_samples(samples: impl IntoIterator<Item = Sample>) -> Self {
        let mut source = Self::new();
        source.reads = samples
            .into_iter()
            .map(|sample| Ok(Reading { sample, fix: None }))
            .collect();
        source
    }
}

impl SampleSource for ScriptedSource {
    async fn read(&mut self) -> Result<Reading, SensorFault> {
        self.reads.pop_front().unwrap_or(Err(SensorFault::Exhausted))
    }

    async fn read_location(&mut self) -> Result<Location, LocationFault> {
        self.location_requests += 1;
        if self.hang_location {
            pending::<()>().await;
        }
        self.location.clone()
    }
}

/// Answers sends from a script (default: success) and records every message.
pub struct ScriptedDispatcher {
    pub responses: VecDeque<Result<(), DispatchFault>>,
    pub sent: Vec<(String, String)>,
    /// When set, `send` never resolves.
    pub hang: bool,
}

impl ScriptedDispatcher {
    pub fn ok() -> Self {
        Self { responses: VecDeque::new(), sent: Vec::new(), hang: false }
    }

    pub fn failing(times: usize) -> Self {
        let mut d = Self::ok();
        d.responses = (0..times).map(|_| Err(DispatchFault::Rejected("no carrier".into()))).collect();
        d
    }
}

impl Dispatcher for ScriptedDispatcher {
    async fn send(&mut self, recipient: &str, text: &str) -> Result<(), DispatchFault> {
        self.sent.push((recipient.to_string(), text.to_string()));
        if self.hang {
            pending::<()>().await;
        }
        self.responses.pop_front().unwrap_or(Ok(()))
    }
}

pub fn baseline_sample(t: f64) -> Sample {
    Sample { timestamp: t, ax: 0.02, ay: -0.01, az: 1.0, gx: 0.5, gy: -0.3, gz: 0.1 }
}
