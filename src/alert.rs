use std::time::Duration;

use serde::Serialize;
use tokio::time::timeout;

use crate::backoff::RetryBackoff;
use crate::config::DetectorConfig;
use crate::decision::CandidateEvent;
use crate::error::{DispatchFault, LocationFault};
use crate::peripherals::{Dispatcher, SampleSource};
use crate::types::{AlertEvent, AlertStatus, Location};

#[derive(Clone, Debug)]
pub struct AlertConfig {
    pub override_delay_s: f64,
    pub cooldown_s: f64,
    pub recipient: String,
    pub retry_count: u32,
    pub dispatch_timeout: Duration,
    pub backoff_base_s: f64,
    pub backoff_max_s: f64,
    pub location_timeout: Duration,
    pub location_max_age_s: f64,
}

impl From<&DetectorConfig> for AlertConfig {
    fn from(config: &DetectorConfig) -> Self {
        Self {
            override_delay_s: config.override_delay_s,
            cooldown_s: config.cooldown_s,
            recipient: config.recipient.clone(),
            retry_count: config.dispatch_retry_count,
            dispatch_timeout: Duration::from_secs_f64(config.dispatch_timeout_s),
            backoff_base_s: config.dispatch_backoff_base_s,
            backoff_max_s: config.dispatch_backoff_max_s,
            location_timeout: Duration::from_secs_f64(config.location_timeout_s),
            location_max_age_s: config.location_max_age_s,
        }
    }
}

/// Controller phase. Deadlines are monotonic seconds on the coordinator clock.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AlertPhase {
    Idle,
    Candidate,
    OverrideWindow { deadline: f64 },
    Dispatching,
    Dispatched { cooldown_until: f64 },
    DispatchFailed { cooldown_until: f64 },
    Cancelled,
}

impl AlertPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertPhase::Idle => "IDLE",
            AlertPhase::Candidate => "CANDIDATE",
            AlertPhase::OverrideWindow { .. } => "OVERRIDE_WINDOW",
            AlertPhase::Dispatching => "DISPATCHING",
            AlertPhase::Dispatched { .. } => "DISPATCHED",
            AlertPhase::DispatchFailed { .. } => "DISPATCH_FAILED",
            AlertPhase::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AlertCounters {
    pub raised: u64,
    pub dispatched: u64,
    pub failed: u64,
    pub cancelled: u64,
}

/// Override countdown and dispatch of one alert at a time.
///
/// All timing comes in through `now`; the controller never sleeps. The only
/// awaited work is one fix request and one send attempt per `advance`, each
/// under its own timeout.
pub struct AlertController<D: Dispatcher> {
    config: AlertConfig,
    dispatcher: D,
    phase: AlertPhase,
    event: Option<AlertEvent>,
    next_id: u64,
    backoff: RetryBackoff,
    message: Option<String>,
    counters: AlertCounters,
}

impl<D: Dispatcher> AlertController<D> {
    pub fn new(config: AlertConfig, dispatcher: D) -> Self {
        let backoff = RetryBackoff::new(config.retry_count, config.backoff_base_s, config.backoff_max_s);
        Self {
            config,
            dispatcher,
            phase: AlertPhase::Idle,
            event: None,
            next_id: 1,
            backoff,
            message: None,
            counters: AlertCounters::default(),
        }
    }

    /// Accepts a candidate only when idle. Starts the override countdown.
    pub fn raise(&mut self, candidate: &CandidateEvent, now: f64) -> bool {
        if self.phase != AlertPhase::Idle {
            log::debug!("[ALERT] candidate ignored in {}", self.phase.as_str());
            return false;
        }

        let mut event = AlertEvent {
            id: self.next_id,
            detected_at: candidate.detected_at,
            detected_wall: chrono::Utc::now().to_rfc3339(),
            confidence: candidate.confidence,
            status: AlertStatus::Candidate,
            location: None,
            location_stale: false,
            dispatch_attempts: 0,
        };
        self.next_id += 1;
        self.counters.raised += 1;
        self.phase = AlertPhase::Candidate;

        event.advance(AlertStatus::OverrideWindow);
        let deadline = now + self.config.override_delay_s;
        self.phase = AlertPhase::OverrideWindow { deadline };
        log::warn!(
            "[ALERT] ⚠ Accident detected (event {}, confidence {:.0}%). Press the button within {:.0}s to cancel",
            event.id,
            event.confidence * 100.0,
            self.config.override_delay_s
        );
        self.event = Some(event);
        true
    }

    /// Honoured only inside the override window; a no-op everywhere else.
    pub fn cancel(&mut self, now: f64) -> bool {
        let AlertPhase::OverrideWindow { deadline } = self.phase else {
            log::info!("[ALERT] cancel ignored in {}", self.phase.as_str());
            return false;
        };
        if let Some(event) = self.event.as_mut() {
            event.advance(AlertStatus::Cancelled);
            log::info!(
                "[ALERT] ✓ event {} cancelled by user ({:.1}s before dispatch)",
                event.id,
                (deadline - now).max(0.0)
            );
        }
        self.counters.cancelled += 1;
        self.phase = AlertPhase::Cancelled;
        true
    }

    /// Moves the state machine forward to `now`. Returns the event whenever
    /// it leaves the live set (dispatched, failed, or cancelled).
    pub async fn advance<S: SampleSource>(
        &mut self,
        now: f64,
        source: &mut S,
        last_fix: Option<Location>,
    ) -> Option<AlertEvent> {
        match self.phase {
            AlertPhase::Idle => None,
            AlertPhase::Candidate => {
                // raise() always opens the window; recover if that was skipped
                self.phase = AlertPhase::OverrideWindow { deadline: now + self.config.override_delay_s };
                None
            }
            AlertPhase::OverrideWindow { deadline } => {
                if now < deadline {
                    return None;
                }
                self.begin_dispatch(source, last_fix).await;
                self.attempt(now).await
            }
            AlertPhase::Dispatching => {
                if self.backoff.ready(now) {
                    self.attempt(now).await
                } else {
                    None
                }
            }
            AlertPhase::Dispatched { cooldown_until } | AlertPhase::DispatchFailed { cooldown_until } => {
                if now >= cooldown_until {
                    log::info!("[ALERT] cool-down over, re-armed");
                    self.finish();
                }
                None
            }
            AlertPhase::Cancelled => {
                let event = self.event.clone();
                self.finish();
                event
            }
        }
    }

    async fn begin_dispatch<S: SampleSource>(&mut self, source: &mut S, last_fix: Option<Location>) {
        self.phase = AlertPhase::Dispatching;
        self.backoff.reset();

        let (location, stale) = self.acquire_location(source, last_fix).await;
        let Some(event) = self.event.as_mut() else {
            return;
        };
        event.advance(AlertStatus::Dispatching);
        event.location = location;
        event.location_stale = stale;
        self.message = Some(compose_message(location.as_ref(), stale, event.confidence));
        log::warn!("[ALERT] dispatching event {} to {}", event.id, self.config.recipient);
    }

    /// Last fix if recent enough, else one bounded request, else the last
    /// known fix flagged as stale.
    async fn acquire_location<S: SampleSource>(
        &self,
        source: &mut S,
        last_fix: Option<Location>,
    ) -> (Option<Location>, bool) {
        let last_valid = last_fix.filter(|fix| fix.fix_valid);
        if let Some(fix) = last_valid {
            if fix.age_secs <= self.config.location_max_age_s {
                return (Some(fix), false);
            }
        }

        let fault = match timeout(self.config.location_timeout, source.read_location()).await {
            Ok(Ok(fix)) if fix.fix_valid => {
                if fix.age_secs <= self.config.location_max_age_s {
                    return (Some(fix), false);
                }
                // an old answer still beats nothing; keep the younger of the two
                let best = match last_valid {
                    Some(last) if last.age_secs < fix.age_secs => last,
                    _ => fix,
                };
                log::warn!("[ALERT] only an old fix is available ({:.0}s)", best.age_secs);
                return (Some(best), true);
            }
            Ok(Ok(_)) => LocationFault::NoFix,
            Ok(Err(fault)) => fault,
            Err(_) => LocationFault::Timeout(self.config.location_timeout),
        };
        log::warn!("[ALERT] location request failed: {}", fault);
        match last_valid {
            Some(fix) => (Some(fix), true),
            None => (None, false),
        }
    }

    async fn attempt(&mut self, now: f64) -> Option<AlertEvent> {
        if self.event.is_none() || self.message.is_none() {
            self.finish();
            return None;
        }
        let (Some(event), Some(text)) = (self.event.as_mut(), self.message.as_deref()) else {
            return None;
        };
        event.dispatch_attempts += 1;

        let limit = self.config.dispatch_timeout;
        let result = match timeout(limit, self.dispatcher.send(&self.config.recipient, text)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchFault::Timeout(limit)),
        };

        match result {
            Ok(()) => {
                self.backoff.record_success();
                event.advance(AlertStatus::Dispatched);
                self.counters.dispatched += 1;
                self.phase = AlertPhase::Dispatched { cooldown_until: now + self.config.cooldown_s };
                log::info!(
                    "[ALERT] ✓ event {} dispatched (attempt {})",
                    event.id,
                    event.dispatch_attempts
                );
                Some(event.clone())
            }
            Err(fault) => match self.backoff.record_failure(now) {
                Some(next_at) => {
                    log::warn!(
                        "[ALERT] ⚠ dispatch attempt {}/{} failed: {} (retry in {:.1}s)",
                        event.dispatch_attempts,
                        self.config.retry_count,
                        fault,
                        next_at - now
                    );
                    None
                }
                None => {
                    event.advance(AlertStatus::DispatchFailed);
                    self.counters.failed += 1;
                    self.phase = AlertPhase::DispatchFailed { cooldown_until: now + self.config.cooldown_s };
                    log::error!(
                        "[ALERT] ✗ event {} DISPATCH_FAILED after {} attempts: {}",
                        event.id,
                        event.dispatch_attempts,
                        fault
                    );
                    Some(event.clone())
                }
            },
        }
    }

    fn finish(&mut self) {
        self.phase = AlertPhase::Idle;
        self.event = None;
        self.message = None;
    }

    pub fn phase(&self) -> AlertPhase {
        self.phase
    }

    pub fn is_idle(&self) -> bool {
        self.phase == AlertPhase::Idle
    }

    /// The current event while it is still live (not yet terminal).
    pub fn active_event(&self) -> Option<&AlertEvent> {
        self.event.as_ref().filter(|event| event.is_live())
    }

    pub fn counters(&self) -> AlertCounters {
        self.counters
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }
}

pub fn compose_message(location: Option<&Location>, stale: bool, confidence: f32) -> String {
    let headline = format!(
        "EMERGENCY: Car accident detected (confidence {:.0}%)!",
        (confidence * 100.0).clamp(0.0, 100.0)
    );
    match location {
        Some(fix) => {
            let mut text = format!(
                "{} Location: {:.6},{:.6} {}",
                headline,
                fix.lat,
                fix.lon,
                fix.map_link()
            );
            if stale {
                text.push_str(&format!(" (last known fix, {:.0}s old)", fix.age_secs));
            }
            text
        }
        None => format!("{} Location unknown.", headline),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Trigger;
    use crate::peripherals::testing::{ScriptedDispatcher, ScriptedSource};

    const TICK: f64 = 0.02;

    fn config() -> AlertConfig {
        AlertConfig {
            override_delay_s: 15.0,
            cooldown_s: 30.0,
            recipient: "+15550100".to_string(),
            retry_count: 3,
            dispatch_timeout: Duration::from_secs(10),
            backoff_base_s: 2.0,
            backoff_max_s: 30.0,
            location_timeout: Duration::from_secs(5),
            location_max_age_s: 300.0,
        }
    }

    fn candidate(at: f64) -> CandidateEvent {
        CandidateEvent { confidence: 0.95, detected_at: at, trigger: Trigger::Sustained, qualifying_windows: 3 }
    }

    fn fix() -> Option<Location> {
        Some(Location { lat: 37.7749, lon: -122.4194, fix_valid: true, age_secs: 2.0 })
    }

    /// Ticks until the controller hands back a finished event.
    async fn run_until_event(
        alert: &mut AlertController<ScriptedDispatcher>,
        source: &mut ScriptedSource,
        start: f64,
        limit: f64,
    ) -> Option<(f64, AlertEvent)> {
        let mut now = start;
        while now <= limit {
            if let Some(event) = alert.advance(now, source, fix()).await {
                return Some((now, event));
            }
            now += TICK;
        }
        None
    }

    #[tokio::test]
    async fn test_cancel_in_override_window() {
        let mut alert = AlertController::new(config(), ScriptedDispatcher::ok());
        let mut source = ScriptedSource::new();

        assert!(alert.raise(&candidate(1.0), 1.0));
        assert_eq!(alert.phase(), AlertPhase::OverrideWindow { deadline: 16.0 });
        assert!(alert.advance(5.0, &mut source, fix()).await.is_none());

        assert!(alert.cancel(5.0));
        assert_eq!(alert.phase(), AlertPhase::Cancelled);

        let event = alert.advance(5.02, &mut source, fix()).await.unwrap();
        assert_eq!(event.status, AlertStatus::Cancelled);
        assert!(alert.is_idle());
        assert!(alert.dispatcher().sent.is_empty());
        assert_eq!(alert.counters().cancelled, 1);
    }

    #[tokio::test]
    async fn test_countdown_matches_override_delay() {
        for start in [0.0, 3.37, 120.5] {
            let mut alert = AlertController::new(config(), ScriptedDispatcher::ok());
            let mut source = ScriptedSource::new();
            alert.raise(&candidate(start), start);

            let (sent_at, event) = run_until_event(&mut alert, &mut source, start, start + 20.0)
                .await
                .unwrap();
            let elapsed = sent_at - start;
            assert!(elapsed >= 15.0 - 1e-9 && elapsed <= 15.0 + TICK + 1e-9, "elapsed {}", elapsed);
            assert_eq!(event.status, AlertStatus::Dispatched);
        }
    }

    #[tokio::test]
    async fn test_cancel_after_dispatch_started_is_noop() {
        let mut alert = AlertController::new(config(), ScriptedDispatcher::failing(1));
        let mut source = ScriptedSource::new();
        alert.raise(&candidate(0.0), 0.0);

        // first attempt fails, controller waits in DISPATCHING for the retry
        assert!(alert.advance(15.0, &mut source, fix()).await.is_none());
        assert_eq!(alert.phase(), AlertPhase::Dispatching);

        assert!(!alert.cancel(15.5));
        assert_eq!(alert.phase(), AlertPhase::Dispatching);

        let (_, event) = run_until_event(&mut alert, &mut source, 15.5, 30.0).await.unwrap();
        assert_eq!(event.status, AlertStatus::Dispatched);
        assert_eq!(event.dispatch_attempts, 2);
        assert_eq!(alert.counters().cancelled, 0);
    }

    #[tokio::test]
    async fn test_retries_exhausted_then_cooldown() {
        let mut alert = AlertController::new(config(), ScriptedDispatcher::failing(10));
        let mut source = ScriptedSource::new();
        alert.raise(&candidate(0.0), 0.0);

        let (failed_at, event) = run_until_event(&mut alert, &mut source, 0.0, 60.0).await.unwrap();
        assert_eq!(event.status, AlertStatus::DispatchFailed);
        assert_eq!(event.dispatch_attempts, 3);
        assert_eq!(alert.dispatcher().sent.len(), 3);
        // 15s countdown, then retries after 2s and 4s
        assert!((failed_at - 21.0).abs() < 0.1, "failed at {}", failed_at);

        assert!(!alert.raise(&candidate(failed_at), failed_at));
        alert.advance(failed_at + 29.0, &mut source, fix()).await;
        assert!(!alert.is_idle());
        alert.advance(failed_at + 30.0, &mut source, fix()).await;
        assert!(alert.is_idle());
        assert_eq!(alert.counters().failed, 1);
    }

    #[tokio::test]
    async fn test_only_one_live_event() {
        let mut alert = AlertController::new(config(), ScriptedDispatcher::ok());
        assert!(alert.raise(&candidate(0.0), 0.0));
        assert!(!alert.raise(&candidate(0.5), 0.5));
        assert_eq!(alert.active_event().map(|e| e.id), Some(1));
        assert_eq!(alert.counters().raised, 1);
    }

    #[tokio::test]
    async fn test_message_with_fresh_fix() {
        let mut alert = AlertController::new(config(), ScriptedDispatcher::ok());
        let mut source = ScriptedSource::new();
        alert.raise(&candidate(0.0), 0.0);
        alert.advance(15.0, &mut source, fix()).await.unwrap();

        let (recipient, text) = &alert.dispatcher().sent[0];
        assert_eq!(recipient, "+15550100");
        assert_eq!(
            text,
            "EMERGENCY: Car accident detected (confidence 95%)! Location: 37.774900,-122.419400 \
             https://www.google.com/maps?q=37.774900,-122.419400"
        );
        // a recent fix is used directly
        assert_eq!(source.location_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_location_timeout_falls_back_to_stale_fix() {
        let mut alert = AlertController::new(config(), ScriptedDispatcher::ok());
        let mut source = ScriptedSource::new();
        source.hang_location = true;
        let old = Location { lat: 1.5, lon: 2.5, fix_valid: true, age_secs: 600.0 };

        alert.raise(&candidate(0.0), 0.0);
        let event = alert.advance(15.0, &mut source, Some(old)).await.unwrap();

        assert_eq!(source.location_requests, 1);
        assert!(event.location_stale);
        assert!(alert.dispatcher().sent[0].1.ends_with("(last known fix, 600s old)"));
    }

    #[tokio::test]
    async fn test_old_fix_from_request_is_marked_stale() {
        let mut alert = AlertController::new(config(), ScriptedDispatcher::ok());
        let mut source = ScriptedSource::new();
        source.location = Ok(Location { lat: 1.5, lon: 2.5, fix_valid: true, age_secs: 900.0 });

        alert.raise(&candidate(0.0), 0.0);
        let event = alert.advance(15.0, &mut source, None).await.unwrap();

        assert_eq!(source.location_requests, 1);
        assert!(event.location_stale);
        assert!(alert.dispatcher().sent[0].1.ends_with("(last known fix, 900s old)"));
    }

    #[tokio::test]
    async fn test_no_location_at_all() {
        let mut alert = AlertController::new(config(), ScriptedDispatcher::ok());
        let mut source = ScriptedSource::new();
        source.location = Err(LocationFault::NoFix);

        alert.raise(&candidate(0.0), 0.0);
        let event = alert.advance(15.0, &mut source, None).await.unwrap();

        assert!(event.location.is_none());
        assert!(alert.dispatcher().sent[0].1.ends_with("Location unknown."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_dispatcher_times_out() {
        let mut dispatcher = ScriptedDispatcher::ok();
        dispatcher.hang = true;
        let mut alert = AlertController::new(AlertConfig { retry_count: 1, ..config() }, dispatcher);
        let mut source = ScriptedSource::new();

        alert.raise(&candidate(0.0), 0.0);
        let event = alert.advance(15.0, &mut source, fix()).await.unwrap();
        assert_eq!(event.status, AlertStatus::DispatchFailed);
        assert_eq!(event.dispatch_attempts, 1);
    }

    #[test]
    fn test_compose_message_rounds_confidence() {
        let text = compose_message(None, false, 0.874);
        assert_eq!(text, "EMERGENCY: Car accident detected (confidence 87%)! Location unknown.");
    }
}
