use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use accident_detector_rs::coordinator::Coordinator;
use accident_detector_rs::forwarder::EventForwarder;
use accident_detector_rs::inference::Detector;
use accident_detector_rs::peripherals::replay::ReplaySource;
use accident_detector_rs::error::SensorFault;
use accident_detector_rs::peripherals::{Dispatcher, Peripheral, SampleSource};
use accident_detector_rs::signals::ButtonLatch;
use accident_detector_rs::status::{LiveStatusFile, LogStatusSink};
use accident_detector_rs::DetectorConfig;

#[cfg(not(feature = "hardware"))]
use accident_detector_rs::peripherals::sim::{LogDispatcher, SimulatedSource};
#[cfg(feature = "hardware")]
use accident_detector_rs::peripherals::{sim7000::Sim7000Dispatcher, termux::TermuxSource};

#[derive(Parser, Debug)]
#[command(name = "accident_detector")]
#[command(about = "On-device accident detection with a cancellable emergency alert", long_about = None)]
struct Args {
    /// Duration in seconds (0 = continuous)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// JSON config file (missing keys use defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model artifact (.json or .json.gz)
    #[arg(long)]
    model: Option<PathBuf>,

    /// Emergency contact phone number
    #[arg(long)]
    recipient: Option<String>,

    /// Write the live status JSON here
    #[arg(long)]
    status_path: Option<PathBuf>,

    /// Forward finished alert events to this backend
    #[arg(long)]
    backend_url: Option<String>,

    /// Play back a recorded session instead of reading sensors
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Inject a simulated crash this many seconds after start
    #[cfg(not(feature = "hardware"))]
    #[arg(long, value_name = "SECONDS")]
    inject_crash_at: Option<f64>,

    /// Serial device of the SIM7000 modem
    #[cfg(feature = "hardware")]
    #[arg(long, default_value = "/dev/ttyUSB0")]
    modem: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = load_config(&args)?;

    println!("[{}] Accident Detector Starting", ts_now());
    println!("  Duration: {} seconds (0=continuous)", args.duration);
    println!("  Sampling: {} Hz, window {}", config.sampling_rate_hz, config.window_size);
    println!("  Model: {}", config.model_path.display());
    println!("  Recipient: {}", config.recipient);
    println!("  Press Enter to cancel a pending alert, 'r' + Enter to clear a sensor fault");

    let buttons = Arc::new(ButtonLatch::new());
    spawn_button_thread(buttons.clone());

    let detector = Detector::load(&config.model_path, &config);

    // a missing modem or sensor is a runtime fault, not a reason to exit
    #[cfg(feature = "hardware")]
    let dispatcher = Peripheral::from_result(
        "modem",
        Sim7000Dispatcher::open(&args.modem, config.modem_response_timeout()).await,
    );
    #[cfg(not(feature = "hardware"))]
    let dispatcher = LogDispatcher::default();

    if let Some(path) = &args.replay {
        let source = ReplaySource::load(path)?;
        println!("[{}] Replaying {} readings from {}", ts_now(), source.len(), path.display());
        return run(config, Peripheral::Online(source), dispatcher, detector, buttons, args.duration).await;
    }

    #[cfg(feature = "hardware")]
    let source = Peripheral::from_result("motion sensor", TermuxSource::spawn(config.sampling_rate_hz));
    #[cfg(not(feature = "hardware"))]
    let source = {
        let source = SimulatedSource::new(config.sampling_rate_hz);
        Peripheral::Online(match args.inject_crash_at {
            Some(t) => source.with_crash_at(t),
            None => source,
        })
    };

    run(config, source, dispatcher, detector, buttons, args.duration).await
}

fn load_config(args: &Args) -> Result<DetectorConfig> {
    let mut config = match &args.config {
        Some(path) => DetectorConfig::load(path)?,
        None => DetectorConfig::default(),
    };
    if let Some(model) = &args.model {
        config.model_path = model.clone();
    }
    if let Some(recipient) = &args.recipient {
        config.recipient = recipient.clone();
    }
    if args.status_path.is_some() {
        config.status_path = args.status_path.clone();
    }
    if args.backend_url.is_some() {
        config.backend_url = args.backend_url.clone();
    }
    Ok(config.validate()?)
}

async fn run<S: SampleSource, D: Dispatcher>(
    config: DetectorConfig,
    source: Peripheral<S>,
    dispatcher: D,
    detector: Detector,
    buttons: Arc<ButtonLatch>,
    duration_secs: u64,
) -> Result<()> {
    let sink = (LogStatusSink::default(), config.status_path.clone().map(LiveStatusFile::new));
    let forwarder = config.backend_url.as_deref().map(EventForwarder::new);

    let startup_fault = source.offline_reason().map(|reason| SensorFault::Unavailable(reason.to_string()));
    let mut coordinator = Coordinator::new(config, source, dispatcher, sink, detector, buttons);
    if let Some(fault) = startup_fault {
        println!("  Sensor FAULT at startup: {}", fault);
        coordinator = coordinator.with_sensor_fault(fault);
    }
    if let Some(forwarder) = forwarder {
        println!("  Forwarding events to {}", forwarder.endpoint());
        coordinator = coordinator.with_forwarder(forwarder);
    }

    let duration = (duration_secs > 0).then(|| Duration::from_secs(duration_secs));
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let summary = coordinator.run(shutdown, duration).await;

    println!("\n=== Session Summary ===");
    println!("Samples: {}", summary.counters.samples);
    println!("Windows evaluated: {}", summary.counters.windows_evaluated);
    println!("Candidates: {}", summary.counters.candidates);
    if summary.degraded {
        println!("Detection ran in DEGRADED mode");
    }
    if summary.sensor_faulted {
        println!("Sensor FAULT still latched at exit");
    }
    for event in &summary.events {
        println!(
            "  event {} at {} -> {:?} (confidence {:.2}, {} attempt(s))",
            event.id, event.detected_wall, event.status, event.confidence, event.dispatch_attempts
        );
    }
    println!("[{}] Stopped", ts_now());
    Ok(())
}

/// Stands in for the hardware button interrupt: the thread only flips the
/// latch, the control loop does the rest.
fn spawn_button_thread(buttons: Arc<ButtonLatch>) {
    thread::spawn(move || {
        let mut reset_typed = false;
        loop {
            match event::read() {
                Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => match key.code {
                    KeyCode::Char('r') | KeyCode::Char('R') => reset_typed = true,
                    KeyCode::Enter => {
                        if reset_typed {
                            buttons.request_reset();
                        } else {
                            buttons.press();
                        }
                        reset_typed = false;
                    }
                    _ => reset_typed = false,
                },
                Ok(_) => {}
                Err(e) => {
                    log::warn!("[BUTTON] input unavailable, override button disabled: {}", e);
                    break;
                }
            }
        }
    });
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
