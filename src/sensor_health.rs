use crate::error::SensorFault;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthChange {
    /// Transient failure; the current window must be discarded.
    Degraded,
    /// The consecutive-failure limit was just reached.
    Faulted,
    /// Still latched in the fault state.
    StillFaulted,
}

/// Tracks read failures of the motion sensor.
///
/// After `fault_limit` consecutive failures the sensor is latched as faulted
/// and stays that way until `reset` is called, even if reads start working.
#[derive(Clone, Debug)]
pub struct SensorHealth {
    pub name: String,
    pub fault_limit: u32,
    consecutive_failures: u32,
    total_failures: u64,
    last_good_at: Option<f64>,
    last_fault: Option<SensorFault>,
    faulted: bool,
}

impl SensorHealth {
    pub fn new(name: &str, fault_limit: u32) -> Self {
        SensorHealth {
            name: name.to_string(),
            fault_limit,
            consecutive_failures: 0,
            total_failures: 0,
            last_good_at: None,
            last_fault: None,
            faulted: false,
        }
    }

    pub fn record_success(&mut self, now: f64) {
        self.consecutive_failures = 0;
        self.last_good_at = Some(now);
    }

    pub fn record_failure(&mut self, fault: SensorFault) -> HealthChange {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.total_failures += 1;
        self.last_fault = Some(fault);

        if self.faulted {
            return HealthChange::StillFaulted;
        }
        if self.consecutive_failures >= self.fault_limit {
            self.faulted = true;
            log::error!(
                "[HEALTH] ✗ {} FAULT after {} consecutive failures (last: {})",
                self.name,
                self.consecutive_failures,
                self.last_fault_text()
            );
            return HealthChange::Faulted;
        }
        log::warn!(
            "[HEALTH] ⚠ {} read failed ({}/{}): {}",
            self.name,
            self.consecutive_failures,
            self.fault_limit,
            self.last_fault_text()
        );
        HealthChange::Degraded
    }

    /// Enters the fault state immediately, e.g. when the sensor could not be
    /// opened at all. Cleared by `reset` like any other fault.
    pub fn latch(&mut self, fault: SensorFault) {
        self.total_failures += 1;
        self.consecutive_failures = self.consecutive_failures.max(self.fault_limit);
        self.last_fault = Some(fault);
        self.faulted = true;
        log::error!("[HEALTH] ✗ {} FAULT: {}", self.name, self.last_fault_text());
    }

    pub fn reset(&mut self) {
        if self.faulted {
            log::info!("[HEALTH] ✓ {} fault cleared by reset", self.name);
        }
        self.faulted = false;
        self.consecutive_failures = 0;
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures
    }

    /// Seconds since the last good sample, if there ever was one.
    pub fn silence(&self, now: f64) -> Option<f64> {
        self.last_good_at.map(|t| (now - t).max(0.0))
    }

    fn last_fault_text(&self) -> String {
        self.last_fault
            .as_ref()
            .map(|f| f.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latches_after_limit() {
        let mut health = SensorHealth::new("IMU", 3);

        assert_eq!(health.record_failure(SensorFault::Exhausted), HealthChange::Degraded);
        assert_eq!(health.record_failure(SensorFault::Exhausted), HealthChange::Degraded);
        assert_eq!(health.record_failure(SensorFault::Exhausted), HealthChange::Faulted);
        assert!(health.is_faulted());
        assert_eq!(health.record_failure(SensorFault::Exhausted), HealthChange::StillFaulted);

        // a good read does not clear the latch
        health.record_success(1.0);
        assert!(health.is_faulted());

        health.reset();
        assert!(!health.is_faulted());
        assert_eq!(health.total_failures(), 4);
    }

    #[test]
    fn test_success_breaks_the_run() {
        let mut health = SensorHealth::new("IMU", 2);
        health.record_failure(SensorFault::Malformed("x".into()));
        health.record_success(0.5);
        assert_eq!(health.consecutive_failures(), 0);
        assert_eq!(health.record_failure(SensorFault::Malformed("x".into())), HealthChange::Degraded);
        assert!(!health.is_faulted());
    }

    #[test]
    fn test_latch_without_reads() {
        let mut health = SensorHealth::new("IMU", 5);
        health.latch(SensorFault::Unavailable("termux-sensor: not found".into()));
        assert!(health.is_faulted());
        assert_eq!(health.consecutive_failures(), 5);
        assert_eq!(health.record_failure(SensorFault::Exhausted), HealthChange::StillFaulted);

        health.reset();
        assert!(!health.is_faulted());
    }

    #[test]
    fn test_silence() {
        let mut health = SensorHealth::new("IMU", 2);
        assert_eq!(health.silence(3.0), None);
        health.record_success(1.0);
        assert_eq!(health.silence(3.5), Some(2.5));
    }
}
