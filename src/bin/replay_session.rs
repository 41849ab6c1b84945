use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use accident_detector_rs::coordinator::{Coordinator, RunSummary};
use accident_detector_rs::inference::Detector;
use accident_detector_rs::peripherals::replay::ReplaySource;
use accident_detector_rs::peripherals::sim::LogDispatcher;
use accident_detector_rs::signals::ButtonLatch;
use accident_detector_rs::status::LogStatusSink;
use accident_detector_rs::DetectorConfig;

/// Runs a recorded session through the full pipeline on a virtual clock and
/// prints what would have been dispatched. Used to tune thresholds offline.
#[derive(Parser, Debug)]
struct Args {
    /// Recorded session (.json or .json.gz)
    #[arg(value_name = "RECORDING")]
    recording: PathBuf,

    /// JSON config file (missing keys use defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model artifact override
    #[arg(long)]
    model: Option<PathBuf>,

    /// Override T
    #[arg(long)]
    threshold: Option<f32>,

    /// Override T_high
    #[arg(long)]
    threshold_high: Option<f32>,

    /// Override K
    #[arg(long)]
    hysteresis: Option<u32>,

    /// Dispatch immediately instead of waiting out the override window
    #[arg(long)]
    no_override: bool,

    /// Write the JSON summary here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Serialize)]
struct ReplayReport<'a> {
    recording: String,
    readings: usize,
    threshold: f32,
    threshold_high: f32,
    hysteresis_count: u32,
    #[serde(flatten)]
    summary: &'a RunSummary,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => DetectorConfig::load(path)?,
        None => DetectorConfig::default(),
    };
    if let Some(model) = &args.model {
        config.model_path = model.clone();
    }
    if let Some(t) = args.threshold {
        config.confidence_threshold = t;
    }
    if let Some(t) = args.threshold_high {
        config.confidence_threshold_high = t;
    }
    if let Some(k) = args.hysteresis {
        config.hysteresis_count = k;
    }
    if args.no_override {
        config.override_delay_s = 0.0;
    }
    let config = config.validate()?;

    let source = ReplaySource::load(&args.recording)?;
    let readings = source.len();

    // enough ticks to drain the recording and settle one trailing alert
    let settle_s = config.override_delay_s
        + config.dispatch_retry_count as f64 * (config.dispatch_timeout_s + config.dispatch_backoff_max_s)
        + config.location_timeout_s;
    let max_ticks = readings as u64 + (settle_s * config.sampling_rate_hz).ceil() as u64 + 1;

    let detector = Detector::load(&config.model_path, &config);
    let mut coordinator = Coordinator::new(
        config.clone(),
        source,
        LogDispatcher::default(),
        LogStatusSink::default(),
        detector,
        Arc::new(ButtonLatch::new()),
    );
    let summary = coordinator.run_virtual(max_ticks).await;

    let report = ReplayReport {
        recording: args.recording.display().to_string(),
        readings,
        threshold: config.confidence_threshold,
        threshold_high: config.confidence_threshold_high,
        hysteresis_count: config.hysteresis_count,
        summary: &summary,
    };
    let json = serde_json::to_string_pretty(&report)?;
    match &args.output {
        Some(path) => std::fs::write(path, json)?,
        None => println!("{}", json),
    }
    Ok(())
}
