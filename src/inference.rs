use std::path::Path;
use std::time::{Duration, Instant};

use crate::config::DetectorConfig;
use crate::error::ModelLoadError;
use crate::fusion_window::Window;
use crate::model::QuantizedLstm;
use crate::normalizer::{FeatureTensor, Normalizer};
use crate::types::InferenceResult;

/// Anything that maps a normalised window to a raw accident score.
///
/// Implementations must be pure and must not touch disk or network.
pub trait ConfidenceModel {
    fn score(&self, tensor: &FeatureTensor) -> f32;
}

impl ConfidenceModel for QuantizedLstm {
    fn score(&self, tensor: &FeatureTensor) -> f32 {
        self.forward(tensor.view())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct InferenceStats {
    pub calls: u64,
    pub deadline_misses: u64,
    pub worst_case: Duration,
}

/// Wraps a model with the output contract (confidence clamped to [0, 1],
/// NaN treated as 0) and latency accounting against a fixed budget.
pub struct InferenceEngine {
    model: Box<dyn ConfidenceModel + Send>,
    budget: Duration,
    stats: InferenceStats,
}

impl InferenceEngine {
    pub fn new(model: Box<dyn ConfidenceModel + Send>, budget: Duration) -> Self {
        Self { model, budget, stats: InferenceStats::default() }
    }

    pub fn infer(&mut self, tensor: &FeatureTensor, at: f64) -> InferenceResult {
        let start = Instant::now();
        let raw = self.model.score(tensor);
        let elapsed = start.elapsed();

        self.stats.calls += 1;
        if elapsed > self.stats.worst_case {
            self.stats.worst_case = elapsed;
        }
        if elapsed > self.budget {
            self.stats.deadline_misses += 1;
            log::warn!(
                "[INFER] inference took {:.1} ms (budget {} ms, {} misses so far)",
                elapsed.as_secs_f64() * 1000.0,
                self.budget.as_millis(),
                self.stats.deadline_misses
            );
        }

        let confidence = if raw.is_nan() { 0.0 } else { raw.clamp(0.0, 1.0) };
        InferenceResult { confidence, at }
    }

    pub fn stats(&self) -> InferenceStats {
        self.stats
    }
}

/// Fallback used when the model cannot be loaded: a fixed threshold on the
/// peak raw acceleration magnitude of the window.
#[derive(Clone, Copy, Debug)]
pub struct MagnitudeRule {
    pub threshold_g: f64,
}

impl MagnitudeRule {
    pub fn evaluate(&self, window: &Window, at: f64) -> InferenceResult {
        let confidence = if window.peak_accel_magnitude() > self.threshold_g { 1.0 } else { 0.0 };
        InferenceResult { confidence, at }
    }
}

/// Times one pass over an all-zero window. Nothing is recorded in the
/// engine's statistics.
pub fn time_one_pass(model: &dyn ConfidenceModel, window_size: usize) -> Duration {
    let tensor = FeatureTensor::zeros(window_size);
    let start = Instant::now();
    std::hint::black_box(model.score(&tensor));
    start.elapsed()
}

/// The detection step of the pipeline: either the full
/// normalise-then-infer path or the degraded magnitude rule.
pub enum Detector {
    Model {
        normalizer: Normalizer,
        engine: InferenceEngine,
        scratch: FeatureTensor,
    },
    Degraded(MagnitudeRule),
}

impl Detector {
    pub fn with_model(
        normalizer: Normalizer,
        model: Box<dyn ConfidenceModel + Send>,
        config: &DetectorConfig,
    ) -> Self {
        Detector::Model {
            normalizer,
            engine: InferenceEngine::new(model, config.inference_budget()),
            scratch: FeatureTensor::zeros(config.window_size),
        }
    }

    pub fn degraded(config: &DetectorConfig) -> Self {
        Detector::Degraded(MagnitudeRule { threshold_g: config.degraded_accel_threshold_g })
    }

    /// Loads the frozen artifact. A load failure is logged and turns into
    /// degraded mode; detection is never switched off.
    pub fn load(path: &Path, config: &DetectorConfig) -> Self {
        match Self::try_load(path, config) {
            Ok(detector) => detector,
            Err(e) => {
                log::error!("[MODEL] {} - falling back to degraded magnitude rule", e);
                Self::degraded(config)
            }
        }
    }

    pub fn try_load(path: &Path, config: &DetectorConfig) -> Result<Self, ModelLoadError> {
        let model = QuantizedLstm::load(path, config.window_size)?;
        let warm_up = time_one_pass(&model, config.window_size);
        log::info!(
            "[MODEL] loaded {} ({} MACs per window, warm-up pass {:.2} ms)",
            path.display(),
            model.mac_count(),
            warm_up.as_secs_f64() * 1000.0
        );
        if warm_up > config.inference_budget() {
            log::warn!(
                "[MODEL] ⚠ warm-up pass exceeds the {} ms budget; expect deadline misses",
                config.inference_budget().as_millis()
            );
        }
        let normalizer = model.normalizer().clone();
        Ok(Self::with_model(normalizer, Box::new(model), config))
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Detector::Degraded(_))
    }

    pub fn evaluate(&mut self, window: &Window, at: f64) -> InferenceResult {
        match self {
            Detector::Model { normalizer, engine, scratch } => {
                normalizer.normalize_into(window, scratch);
                engine.infer(scratch, at)
            }
            Detector::Degraded(rule) => rule.evaluate(window, at),
        }
    }

    pub fn stats(&self) -> InferenceStats {
        match self {
            Detector::Model { engine, .. } => engine.stats(),
            Detector::Degraded(_) => InferenceStats::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::tiny_artifact;
    use crate::types::Sample;

    struct Fixed(f32);

    impl ConfidenceModel for Fixed {
        fn score(&self, _tensor: &FeatureTensor) -> f32 {
            self.0
        }
    }

    struct Slow;

    impl ConfidenceModel for Slow {
        fn score(&self, _tensor: &FeatureTensor) -> f32 {
            std::thread::sleep(Duration::from_millis(5));
            0.5
        }
    }

    fn window(ax: f64, n: usize) -> Window {
        Window::from_samples(vec![Sample { ax, az: 1.0, ..Default::default() }; n])
    }

    #[test]
    fn test_confidence_is_clamped() {
        let tensor = FeatureTensor::zeros(4);
        let mut high = InferenceEngine::new(Box::new(Fixed(1.7)), Duration::from_millis(50));
        let mut low = InferenceEngine::new(Box::new(Fixed(-0.2)), Duration::from_millis(50));
        let mut nan = InferenceEngine::new(Box::new(Fixed(f32::NAN)), Duration::from_millis(50));

        assert_eq!(high.infer(&tensor, 1.0).confidence, 1.0);
        assert_eq!(low.infer(&tensor, 1.0).confidence, 0.0);
        assert_eq!(nan.infer(&tensor, 1.0).confidence, 0.0);
    }

    #[test]
    fn test_deadline_misses_counted() {
        let tensor = FeatureTensor::zeros(4);
        let mut engine = InferenceEngine::new(Box::new(Slow), Duration::from_millis(1));
        engine.infer(&tensor, 0.0);
        engine.infer(&tensor, 0.02);

        let stats = engine.stats();
        assert_eq!(stats.calls, 2);
        assert_eq!(stats.deadline_misses, 2);
        assert!(stats.worst_case >= Duration::from_millis(5));
    }

    #[test]
    fn test_warm_up_pass_timed() {
        let slow = time_one_pass(&Slow, 4);
        assert!(slow >= Duration::from_millis(5));
        assert!(time_one_pass(&Fixed(0.5), 4) < slow);
    }

    #[test]
    fn test_magnitude_rule() {
        let rule = MagnitudeRule { threshold_g: 4.0 };
        assert_eq!(rule.evaluate(&window(0.2, 10), 0.0).confidence, 0.0);
        assert_eq!(rule.evaluate(&window(8.5, 10), 0.0).confidence, 1.0);
    }

    #[test]
    fn test_missing_model_degrades() {
        let config = DetectorConfig::default();
        let detector = Detector::load(Path::new("/nonexistent/model.json"), &config);
        assert!(detector.is_degraded());
    }

    #[test]
    fn test_loaded_model_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, serde_json::to_vec(&tiny_artifact(50)).unwrap()).unwrap();

        let config = DetectorConfig::default();
        let mut detector = Detector::load(&path, &config);
        assert!(!detector.is_degraded());

        let w = window(0.7, 50);
        let a = detector.evaluate(&w, 1.0);
        let b = detector.evaluate(&w, 1.0);
        assert_eq!(a.confidence.to_bits(), b.confidence.to_bits());
        assert_eq!(detector.stats().calls, 2);
    }
}
