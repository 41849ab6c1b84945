//! The control loop: one cooperative task that samples, fuses, infers,
//! decides and advances the alert state machine once per tick.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant, MissedTickBehavior};

use crate::alert::{AlertConfig, AlertController, AlertPhase};
use crate::config::DetectorConfig;
use crate::decision::{CandidateEvent, DecisionPolicy, PolicyConfig};
use crate::error::SensorFault;
use crate::forwarder::EventForwarder;
use crate::fusion_window::{FusionWindow, Window};
use crate::inference::Detector;
use crate::peripherals::{Dispatcher, SampleSource};
use crate::sensor_health::{HealthChange, SensorHealth};
use crate::signals::ButtonLatch;
use crate::status::{StatusIndicator, StatusReport, StatusSink};
use crate::types::{AlertEvent, Location, Sample};

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct PipelineCounters {
    pub ticks: u64,
    pub samples: u64,
    pub windows_evaluated: u64,
    pub candidates: u64,
}

/// What happened during one tick.
#[derive(Debug, Default)]
pub struct StepOutcome {
    pub sampled: bool,
    pub candidate: Option<CandidateEvent>,
    /// An event that left the live set this tick.
    pub finished: Option<AlertEvent>,
    /// The source has no more samples (replay finished).
    pub exhausted: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub counters: PipelineCounters,
    pub degraded: bool,
    pub sensor_faulted: bool,
    pub events: Vec<AlertEvent>,
}

pub struct Coordinator<S: SampleSource, D: Dispatcher, K: StatusSink> {
    config: DetectorConfig,
    source: S,
    window: FusionWindow,
    snapshot: Window,
    detector: Detector,
    policy: DecisionPolicy,
    alert: AlertController<D>,
    health: SensorHealth,
    buttons: Arc<ButtonLatch>,
    sink: K,
    forwarder: Option<EventForwarder>,
    /// Last valid fix and the loop time it was captured at.
    last_fix: Option<(Location, f64)>,
    trigger_peak: Option<Sample>,
    counters: PipelineCounters,
    last_confidence: Option<f32>,
    published: Option<(StatusIndicator, &'static str)>,
}

impl<S: SampleSource, D: Dispatcher, K: StatusSink> Coordinator<S, D, K> {
    /// `config` must already be validated.
    pub fn new(
        config: DetectorConfig,
        source: S,
        dispatcher: D,
        sink: K,
        detector: Detector,
        buttons: Arc<ButtonLatch>,
    ) -> Self {
        if detector.is_degraded() {
            log::warn!(
                "[COORD] running in DEGRADED mode (|a| > {:.1} g rule)",
                config.degraded_accel_threshold_g
            );
        }
        Self {
            window: FusionWindow::new(config.window_size),
            snapshot: Window::with_capacity(config.window_size),
            policy: DecisionPolicy::new(PolicyConfig::from(&config)),
            alert: AlertController::new(AlertConfig::from(&config), dispatcher),
            health: SensorHealth::new("IMU", config.sensor_fault_limit),
            config,
            source,
            detector,
            buttons,
            sink,
            forwarder: None,
            last_fix: None,
            trigger_peak: None,
            counters: PipelineCounters::default(),
            last_confidence: None,
            published: None,
        }
    }

    pub fn with_forwarder(mut self, forwarder: EventForwarder) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    /// Starts with the sensor already latched as faulted (the backend never
    /// came up). A reset retries it like any other fault.
    pub fn with_sensor_fault(mut self, fault: SensorFault) -> Self {
        self.health.latch(fault);
        log::error!("[COORD] detection suspended until reset");
        self
    }

    /// One tick at loop time `now` (monotonic seconds).
    pub async fn step(&mut self, now: f64) -> StepOutcome {
        let mut outcome = StepOutcome::default();
        self.counters.ticks += 1;

        if self.buttons.take_reset() {
            self.health.reset();
            self.window.reset();
        }
        if self.buttons.take_cancel() {
            self.alert.cancel(now);
        }

        if !self.health.is_faulted() {
            match timeout(self.config.sensor_read_timeout(), self.source.read()).await {
                Ok(Ok(reading)) => {
                    self.health.record_success(now);
                    self.window.push(reading.sample);
                    if let Some(fix) = reading.fix.filter(|f| f.fix_valid) {
                        self.last_fix = Some((fix, now));
                    }
                    self.counters.samples += 1;
                    outcome.sampled = true;
                }
                Ok(Err(SensorFault::Exhausted)) => outcome.exhausted = true,
                Ok(Err(fault)) => self.on_sensor_fault(fault),
                Err(_) => self.on_sensor_fault(SensorFault::Timeout(self.config.sensor_read_timeout())),
            }
        }

        if outcome.sampled && self.window.snapshot_into(&mut self.snapshot) {
            outcome.candidate = self.detect(now);
        }

        let fix = self.fix_for_dispatch(now);
        outcome.finished = self.alert.advance(now, &mut self.source, fix).await;
        if let Some(event) = &outcome.finished {
            if let Some(forwarder) = &self.forwarder {
                forwarder.forward(event, self.trigger_peak.as_ref());
            }
        }

        self.publish_status(now, false);
        outcome
    }

    fn on_sensor_fault(&mut self, fault: SensorFault) {
        // never infer on a window with a hole in it
        self.window.reset();
        if self.health.record_failure(fault) == HealthChange::Faulted {
            log::error!("[COORD] detection suspended until reset");
        }
    }

    fn detect(&mut self, now: f64) -> Option<CandidateEvent> {
        let result = self.detector.evaluate(&self.snapshot, now);
        self.counters.windows_evaluated += 1;
        self.last_confidence = Some(result.confidence);

        self.policy.set_armed(self.alert.is_idle());
        let candidate = self.policy.evaluate(&result)?;
        self.counters.candidates += 1;
        if self.alert.raise(&candidate, now) {
            self.trigger_peak = self
                .snapshot
                .samples()
                .iter()
                .max_by(|a, b| a.accel_magnitude().total_cmp(&b.accel_magnitude()))
                .copied();
        }
        Some(candidate)
    }

    fn fix_for_dispatch(&self, now: f64) -> Option<Location> {
        self.last_fix.map(|(fix, captured_at)| Location {
            age_secs: fix.age_secs + (now - captured_at).max(0.0),
            ..fix
        })
    }

    pub fn indicator(&self) -> StatusIndicator {
        match self.alert.phase() {
            AlertPhase::Candidate | AlertPhase::OverrideWindow { .. } => StatusIndicator::Warning,
            AlertPhase::Dispatching => StatusIndicator::Alerting,
            _ if self.health.is_faulted() => StatusIndicator::Fault,
            _ if !self.window.is_ready() => StatusIndicator::Idle,
            _ => StatusIndicator::Armed,
        }
    }

    pub fn status_report(&self, now: f64) -> StatusReport {
        let stats = self.detector.stats();
        StatusReport {
            indicator: self.indicator(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: now,
            alert_phase: self.alert.phase().as_str(),
            active_event_id: self.alert.active_event().map(|e| e.id),
            degraded: self.detector.is_degraded(),
            sensor_faulted: self.health.is_faulted(),
            sensor_consecutive_failures: self.health.consecutive_failures(),
            sensor_total_failures: self.health.total_failures(),
            samples: self.counters.samples,
            windows_evaluated: self.counters.windows_evaluated,
            candidates: self.counters.candidates,
            last_confidence: self.last_confidence,
            alerts: self.alert.counters(),
            inference_deadline_misses: stats.deadline_misses,
            inference_worst_case_ms: stats.worst_case.as_secs_f64() * 1000.0,
        }
    }

    /// Publishes on every indicator or alert phase change, plus once a
    /// second as a heartbeat.
    fn publish_status(&mut self, now: f64, force: bool) {
        let key = (self.indicator(), self.alert.phase().as_str());
        let heartbeat = self.counters.ticks % (self.config.sampling_rate_hz.round().max(1.0) as u64) == 0;
        if force || heartbeat || self.published != Some(key) {
            self.published = Some(key);
            let report = self.status_report(now);
            self.sink.publish(&report);
        }
    }

    /// Runs in real time until `shutdown` resolves, `duration` elapses, or
    /// the source is exhausted.
    pub async fn run<F: Future<Output = ()>>(&mut self, shutdown: F, duration: Option<Duration>) -> RunSummary {
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let start = Instant::now();
        let mut events = Vec::new();
        tokio::pin!(shutdown);

        log::info!(
            "[COORD] armed: {} Hz, window {}, T={:.2}/{:.2}, K={}",
            self.config.sampling_rate_hz,
            self.config.window_size,
            self.config.confidence_threshold,
            self.config.confidence_threshold_high,
            self.config.hysteresis_count
        );

        let mut now = 0.0;
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("[COORD] shutdown requested");
                    break;
                }
                _ = ticker.tick() => {}
            }
            now = start.elapsed().as_secs_f64();
            if duration.is_some_and(|d| now >= d.as_secs_f64()) {
                log::info!("[COORD] duration reached");
                break;
            }

            let outcome = self.step(now).await;
            events.extend(outcome.finished);
            if outcome.exhausted && self.alert.active_event().is_none() {
                log::info!("[COORD] sample source exhausted");
                break;
            }
        }

        self.publish_status(now, true);
        self.summary(events)
    }

    /// Steps on a virtual clock without sleeping (offline replay). After the
    /// source runs dry, keeps ticking until any live alert has resolved.
    pub async fn run_virtual(&mut self, max_ticks: u64) -> RunSummary {
        let dt = 1.0 / self.config.sampling_rate_hz;
        let mut events = Vec::new();
        let mut now = 0.0;

        for tick in 0..max_ticks {
            now = tick as f64 * dt;
            let outcome = self.step(now).await;
            events.extend(outcome.finished);
            if outcome.exhausted && self.alert.active_event().is_none() {
                break;
            }
        }

        self.publish_status(now, true);
        self.summary(events)
    }

    fn summary(&self, events: Vec<AlertEvent>) -> RunSummary {
        RunSummary {
            counters: self.counters,
            degraded: self.detector.is_degraded(),
            sensor_faulted: self.health.is_faulted(),
            events,
        }
    }

    pub fn alert(&self) -> &AlertController<D> {
        &self.alert
    }

    pub fn counters(&self) -> PipelineCounters {
        self.counters
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }
}
