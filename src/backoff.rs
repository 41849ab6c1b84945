/// Bounded exponential backoff for a retried operation.
///
/// Times are monotonic seconds supplied by the caller, so the schedule is
/// driven by the control loop's clock rather than by sleeping.
#[derive(Clone, Debug)]
pub struct RetryBackoff {
    pub attempts: u32,
    pub max_attempts: u32,
    pub base_delay: f64,
    pub max_delay: f64,
    pub current_delay: f64,
    pub next_attempt_at: f64,
}

impl RetryBackoff {
    pub fn new(max_attempts: u32, base_delay: f64, max_delay: f64) -> Self {
        RetryBackoff {
            attempts: 0,
            max_attempts,
            base_delay,
            max_delay,
            current_delay: base_delay,
            next_attempt_at: 0.0,
        }
    }

    /// True when an attempt is allowed at `now`.
    pub fn ready(&self, now: f64) -> bool {
        self.can_attempt() && now >= self.next_attempt_at
    }

    pub fn can_attempt(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Records a failed attempt and schedules the next one. Returns the next
    /// attempt time, or `None` once every attempt has been used.
    pub fn record_failure(&mut self, now: f64) -> Option<f64> {
        self.attempts += 1;
        if !self.can_attempt() {
            return None;
        }
        let delay = self.current_delay.min(self.max_delay);
        self.next_attempt_at = now + delay;
        self.current_delay = (self.current_delay * 2.0).min(self.max_delay);
        Some(self.next_attempt_at)
    }

    pub fn record_success(&mut self) {
        self.attempts += 1;
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current_delay = self.base_delay;
        self.next_attempt_at = 0.0;
    }
}
