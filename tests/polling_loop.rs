use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use ventlink::alarms::{AlarmEvent, AlarmStateTracker, FaultClass, FaultCodec, SharedRunState, ThresholdEngine};
use ventlink::polling::{
    set_parameter, watchdog_task, AlarmEventSink, CommDecision, CommFailureHandler, DataPoller,
    FaultPoller, SnapshotSink,
};
use ventlink::serial::{DeviceClient, FakeDeviceLink, ObservableSnapshot, SerialError, SerialSettings};

const ALL_FIELDS: &str = "10.0,5.0,21.0,12.0,500.0,5.0,25.0,0,80.0";

fn field_order() -> Vec<String> {
    ventlink::ConsoleConfig::default().field_order
}

fn client_over(fake: &FakeDeviceLink, retry_budget: u32) -> Arc<DeviceClient> {
    let settings = SerialSettings {
        retry_budget,
        ..SerialSettings::default()
    };
    Arc::new(DeviceClient::new(fake.clone(), &settings, field_order()))
}

fn empty_engine(client: Arc<DeviceClient>) -> Arc<Mutex<ThresholdEngine>> {
    Arc::new(Mutex::new(ThresholdEngine::new(
        HashMap::new(),
        client,
        Arc::new(SharedRunState::new(true)),
    )))
}

#[derive(Clone, Default)]
struct CollectSnapshots {
    seen: Arc<StdMutex<Vec<ObservableSnapshot>>>,
}

impl SnapshotSink for CollectSnapshots {
    fn on_snapshot(&mut self, snapshot: &ObservableSnapshot) {
        self.seen.lock().unwrap().push(snapshot.clone());
    }
}

#[derive(Clone, Default)]
struct CollectEvents {
    seen: Arc<StdMutex<Vec<(FaultClass, AlarmEvent)>>>,
}

impl AlarmEventSink for CollectEvents {
    fn on_event(&mut self, class: FaultClass, event: &AlarmEvent) {
        self.seen.lock().unwrap().push((class, event.clone()));
    }
}

struct AlwaysAbort;

impl CommFailureHandler for AlwaysAbort {
    fn on_failure(&mut self, _error: &SerialError) -> CommDecision {
        CommDecision::Abort
    }
}

#[tokio::test]
async fn test_data_poller_feeds_sink_until_stopped() {
    let fake = FakeDeviceLink::new().with_value("all", ALL_FIELDS);
    let client = client_over(&fake, 10);
    let sink = CollectSnapshots::default();

    let poller = DataPoller::new(
        client.clone(),
        empty_engine(client),
        Duration::from_millis(10),
        Box::new(sink.clone()),
        Box::new(AlwaysAbort),
    );

    let (stop_tx, stop_rx) = mpsc::channel(1);
    let handle = tokio::spawn(poller.run(stop_rx));
    tokio::time::sleep(Duration::from_millis(100)).await;
    stop_tx.send(()).await.unwrap();

    handle.await.unwrap().unwrap();
    let seen = sink.seen.lock().unwrap();
    assert!(!seen.is_empty());
    assert_eq!(seen[0]["pressure"], 10.0);
}

#[tokio::test]
async fn test_data_poller_abort_surfaces_the_error() {
    let fake = FakeDeviceLink::malformed();
    let client = client_over(&fake, 1);

    let poller = DataPoller::new(
        client.clone(),
        empty_engine(client),
        Duration::from_millis(5),
        Box::new(CollectSnapshots::default()),
        Box::new(AlwaysAbort),
    );

    let (_stop_tx, stop_rx) = mpsc::channel(1);
    let result = poller.run(stop_rx).await;
    assert!(matches!(result, Err(SerialError::ProtocolFailure { .. })));
}

#[tokio::test]
async fn test_fault_poller_delivers_tracker_events() {
    let fake = FakeDeviceLink::new()
        .with_value("alarm", "1")
        .with_value("warning", "0");
    let client = client_over(&fake, 10);
    let events = CollectEvents::default();

    let poller = FaultPoller::new(
        client,
        Arc::new(Mutex::new(AlarmStateTracker::new(FaultCodec::for_class(
            FaultClass::Alarm,
        )))),
        Arc::new(Mutex::new(AlarmStateTracker::new(FaultCodec::for_class(
            FaultClass::Warning,
        )))),
        Duration::from_millis(10),
        Box::new(events.clone()),
        Box::new(AlwaysAbort),
    );

    let (stop_tx, stop_rx) = mpsc::channel(1);
    let handle = tokio::spawn(poller.run(stop_rx));
    tokio::time::sleep(Duration::from_millis(100)).await;
    stop_tx.send(()).await.unwrap();
    handle.await.unwrap().unwrap();

    let seen = events.seen.lock().unwrap();
    assert!(!seen.is_empty());

    // First poll opens the alarm, later polls report it still open; the
    // quiet warning mask produces no events at all.
    assert!(matches!(
        &seen[0],
        (FaultClass::Alarm, AlarmEvent::Opened { .. })
    ));
    assert!(seen[1..]
        .iter()
        .all(|(class, event)| *class == FaultClass::Alarm
            && matches!(event, AlarmEvent::StillOpen { .. })));
}

#[tokio::test]
async fn test_set_parameter_checks_the_acknowledgement() {
    let fake = FakeDeviceLink::new();
    let client = client_over(&fake, 10);

    assert!(set_parameter(&client, "OK", "peep", 6.5).await.unwrap());
    assert_eq!(fake.stored("peep").as_deref(), Some("6.5"));

    // The device answered, but not with the configured success code.
    fake.push_reply("valore=BUSY");
    assert!(!set_parameter(&client, "OK", "peep", 7.0).await.unwrap());
}

#[tokio::test]
async fn test_watchdog_feeds_until_first_error() {
    let fake = FakeDeviceLink::new();
    let client = client_over(&fake, 1);

    let handle = tokio::spawn(watchdog_task(client, Duration::from_millis(5)));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(fake
        .writes()
        .iter()
        .any(|line| line == "set watchdog_reset 1"));

    // Once the device stops acknowledging, the task returns the error.
    fake.fail_on("watchdog_reset");
    let result = tokio::time::timeout(Duration::from_millis(500), handle)
        .await
        .expect("watchdog should stop after the failure")
        .unwrap();
    assert!(matches!(result, Err(SerialError::ProtocolFailure { .. })));
}
