//! Headless console runner: connects to the device (or the built-in
//! fake), starts the watchdog and both pollers, and prints snapshots
//! and fault events to the terminal. The GUI front end drives the same
//! library surface through its own sinks.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::{mpsc, Mutex};

use ventlink::alarms::{AlarmEvent, AlarmStateTracker, FaultClass, SharedRunState, ThresholdEngine};
use ventlink::config::ConsoleConfig;
use ventlink::polling::{
    watchdog_task, AlarmEventSink, CommDecision, CommFailureHandler, DataPoller, FaultPoller,
    SnapshotSink,
};
use ventlink::serial::{DeviceClient, FakeDeviceLink, ObservableSnapshot, SerialError, SerialInterface};

#[derive(Parser)]
#[command(name = "ventlink", about = "Headless ventilator console")]
struct Args {
    /// Serial port of the device (overrides the config file)
    #[arg(long)]
    port: Option<String>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Talk to the built-in fake device instead of real hardware
    #[arg(long)]
    fake: bool,
}

struct PrintSnapshot;

impl SnapshotSink for PrintSnapshot {
    fn on_snapshot(&mut self, snapshot: &ObservableSnapshot) {
        let mut fields: Vec<(&String, &f64)> = snapshot.iter().collect();
        fields.sort_by(|a, b| a.0.cmp(b.0));
        let line: Vec<String> = fields
            .into_iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        println!("{}", line.join(" "));
    }
}

struct PrintFaults;

impl AlarmEventSink for PrintFaults {
    fn on_event(&mut self, class: FaultClass, event: &AlarmEvent) {
        match event {
            AlarmEvent::Opened { descriptions, .. } => {
                eprintln!("!! {} raised: {}", class, descriptions.join(" - "));
            }
            AlarmEvent::StillOpen { descriptions } => {
                eprintln!("!! {} still active: {}", class, descriptions.join(" - "));
            }
            AlarmEvent::Quiet => {}
        }
    }
}

/// Blocking retry/abort prompt; an operator must always see sustained
/// communication loss.
struct PromptOnFailure;

impl CommFailureHandler for PromptOnFailure {
    fn on_failure(&mut self, error: &SerialError) -> CommDecision {
        eprintln!("COMMUNICATION ERROR: cannot communicate with the hardware");
        eprintln!("{}", error);
        eprintln!("Check cable connections, then [r]etry or [a]bort.");
        let mut answer = String::new();
        match std::io::stdin().read_line(&mut answer) {
            Ok(_) if answer.trim().eq_ignore_ascii_case("r") => CommDecision::Retry,
            _ => CommDecision::Abort,
        }
    }
}

/// Fake device preloaded with plausible idle readings.
fn fake_link(config: &ConsoleConfig) -> FakeDeviceLink {
    let reading = |name: &str| match name {
        "pressure" => "10.0",
        "flow" => "5.0",
        "o2" => "21.0",
        "bpm" => "12.0",
        "tidal" => "500.0",
        "peep" => "5.0",
        "temperature" => "25.0",
        "battery" => "80.0",
        _ => "0",
    };
    let all: Vec<&str> = config.field_order.iter().map(|f| reading(f)).collect();
    FakeDeviceLink::new()
        .with_value("all", &all.join(","))
        .with_value("alarm", "0")
        .with_value("warning", "0")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ConsoleConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ConsoleConfig::default(),
    };
    if let Some(port) = args.port {
        config.serial.port = port;
    }

    let client = Arc::new(if args.fake {
        DeviceClient::new(fake_link(&config), &config.serial, config.field_order.clone())
    } else {
        let link = SerialInterface::open(&config.serial)
            .with_context(|| format!("opening {}", config.serial.port))?;
        DeviceClient::new(link, &config.serial, config.field_order.clone())
    });

    let run_state = SharedRunState::new(true);
    let engine = Arc::new(Mutex::new(ThresholdEngine::new(
        config.thresholds.clone(),
        client.clone(),
        Arc::new(run_state.clone()),
    )));

    let alarm_tracker = Arc::new(Mutex::new(AlarmStateTracker::new(
        config.fault_codec(FaultClass::Alarm),
    )));
    let warning_tracker = Arc::new(Mutex::new(AlarmStateTracker::new(
        config.fault_codec(FaultClass::Warning),
    )));

    let watchdog = tokio::spawn(watchdog_task(client.clone(), config.watchdog_interval()));

    let (_fault_stop_tx, fault_stop_rx) = mpsc::channel(1);
    let fault_poller = FaultPoller::new(
        client.clone(),
        alarm_tracker,
        warning_tracker,
        config.alarm_interval(),
        Box::new(PrintFaults),
        Box::new(PromptOnFailure),
    );
    let faults = tokio::spawn(fault_poller.run(fault_stop_rx));

    let (data_stop_tx, data_stop_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = data_stop_tx.send(()).await;
        }
    });

    let data_poller = DataPoller::new(
        client.clone(),
        engine,
        config.sampling_interval(),
        Box::new(PrintSnapshot),
        Box::new(PromptOnFailure),
    );
    let result = data_poller.run(data_stop_rx).await;

    watchdog.abort();
    faults.abort();
    client.close().await;

    result.context("device communication lost")
}
