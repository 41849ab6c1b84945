use serde::Serialize;

use crate::config::DetectorConfig;
use crate::types::InferenceResult;

#[derive(Clone, Copy, Debug)]
pub struct PolicyConfig {
    pub threshold: f32,
    pub threshold_high: f32,
    pub hysteresis_count: u32,
}

impl From<&DetectorConfig> for PolicyConfig {
    fn from(config: &DetectorConfig) -> Self {
        Self {
            threshold: config.confidence_threshold,
            threshold_high: config.confidence_threshold_high,
            hysteresis_count: config.hysteresis_count,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// `K` consecutive windows above `T`.
    Sustained,
    /// One window above `T_high`.
    Certain,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CandidateEvent {
    pub confidence: f32,
    pub detected_at: f64,
    pub trigger: Trigger,
    pub qualifying_windows: u32,
}

/// Two-tier hysteresis over consecutive window confidences.
///
/// While disarmed (an alert is live or cooling down) every evaluation is
/// swallowed and the run counter stays at zero.
pub struct DecisionPolicy {
    config: PolicyConfig,
    consecutive: u32,
    armed: bool,
}

impl DecisionPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config, consecutive: 0, armed: true }
    }

    pub fn evaluate(&mut self, result: &InferenceResult) -> Option<CandidateEvent> {
        if !self.armed {
            self.consecutive = 0;
            return None;
        }

        if result.confidence > self.config.threshold_high {
            return Some(self.emit(result, Trigger::Certain));
        }

        if result.confidence > self.config.threshold {
            self.consecutive += 1;
            if self.consecutive >= self.config.hysteresis_count {
                return Some(self.emit(result, Trigger::Sustained));
            }
        } else {
            self.consecutive = 0;
        }
        None
    }

    fn emit(&mut self, result: &InferenceResult, trigger: Trigger) -> CandidateEvent {
        let qualifying_windows = self.consecutive.max(1);
        self.consecutive = 0;
        self.armed = false;
        log::info!(
            "[POLICY] candidate ({:?}) confidence {:.3} after {} window(s)",
            trigger,
            result.confidence,
            qualifying_windows
        );
        CandidateEvent {
            confidence: result.confidence,
            detected_at: result.at,
            trigger,
            qualifying_windows,
        }
    }

    /// Re-enables emission once the alert controller is idle again.
    pub fn set_armed(&mut self, armed: bool) {
        if !armed {
            self.consecutive = 0;
        }
        self.armed = armed;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}
