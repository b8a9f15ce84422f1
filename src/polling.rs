//! Periodic device polling: one consolidated data read per tick, fault
//! polls on their own interval, and the watchdog feed.
//!
//! A failed poll is never swallowed: the failure handler collaborator
//! decides between re-entering the loop and aborting, so sustained loss
//! of device communication is always operator-visible.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::alarms::{AlarmEvent, AlarmStateTracker, FaultClass, ThresholdEngine};
use crate::serial::{DeviceClient, ObservableSnapshot, Result, SerialError};

/// Operator's answer to a communication failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommDecision {
    Retry,
    Abort,
}

/// Surfaces a failed poll to the operator and reports the decision.
pub trait CommFailureHandler: Send {
    fn on_failure(&mut self, error: &SerialError) -> CommDecision;
}

/// Receives every successfully polled snapshot (display/plot feed).
pub trait SnapshotSink: Send {
    fn on_snapshot(&mut self, snapshot: &ObservableSnapshot);
}

/// Receives fault-class events produced by the trackers.
pub trait AlarmEventSink: Send {
    fn on_event(&mut self, class: FaultClass, event: &AlarmEvent);
}

/// Periodic `get all` loop feeding the threshold engine and the
/// snapshot sink. Each tick performs exactly one wire round trip.
pub struct DataPoller {
    client: Arc<DeviceClient>,
    engine: Arc<Mutex<ThresholdEngine>>,
    period: Duration,
    sink: Box<dyn SnapshotSink>,
    on_failure: Box<dyn CommFailureHandler>,
}

impl DataPoller {
    pub fn new(
        client: Arc<DeviceClient>,
        engine: Arc<Mutex<ThresholdEngine>>,
        period: Duration,
        sink: Box<dyn SnapshotSink>,
        on_failure: Box<dyn CommFailureHandler>,
    ) -> Self {
        Self {
            client,
            engine,
            period,
            sink,
            on_failure,
        }
    }

    /// Poll until a stop signal arrives or the failure handler answers
    /// `Abort`, in which case the error is returned to the caller (the
    /// process-exit decision belongs there, not here).
    pub async fn run(mut self, mut stop_rx: mpsc::Receiver<()>) -> Result<()> {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::info!("Data polling started ({:?} period)", self.period);

        loop {
            tokio::select! {
                _ = stop_rx.recv() => {
                    log::info!("Data polling stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(error) = self.tick().await {
                        match self.on_failure.on_failure(&error) {
                            CommDecision::Retry => {
                                log::warn!("Poll failed, operator chose retry: {}", error);
                            }
                            CommDecision::Abort => {
                                log::error!("Poll failed, operator chose abort: {}", error);
                                return Err(error);
                            }
                        }
                    }
                }
            }
        }
    }

    async fn tick(&mut self) -> Result<()> {
        let snapshot = self.client.get_all().await?;
        self.engine.lock().await.set_data(&snapshot).await?;
        self.sink.on_snapshot(&snapshot);
        Ok(())
    }
}

/// Periodic alarm/warning mask poll through the two trackers.
pub struct FaultPoller {
    client: Arc<DeviceClient>,
    alarm_tracker: Arc<Mutex<AlarmStateTracker>>,
    warning_tracker: Arc<Mutex<AlarmStateTracker>>,
    period: Duration,
    sink: Box<dyn AlarmEventSink>,
    on_failure: Box<dyn CommFailureHandler>,
}

impl FaultPoller {
    pub fn new(
        client: Arc<DeviceClient>,
        alarm_tracker: Arc<Mutex<AlarmStateTracker>>,
        warning_tracker: Arc<Mutex<AlarmStateTracker>>,
        period: Duration,
        sink: Box<dyn AlarmEventSink>,
        on_failure: Box<dyn CommFailureHandler>,
    ) -> Self {
        Self {
            client,
            alarm_tracker,
            warning_tracker,
            period,
            sink,
            on_failure,
        }
    }

    pub async fn run(mut self, mut stop_rx: mpsc::Receiver<()>) -> Result<()> {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::info!("Fault polling started ({:?} period)", self.period);

        loop {
            tokio::select! {
                _ = stop_rx.recv() => {
                    log::info!("Fault polling stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(error) = self.tick().await {
                        match self.on_failure.on_failure(&error) {
                            CommDecision::Retry => {
                                log::warn!("Fault poll failed, operator chose retry: {}", error);
                            }
                            CommDecision::Abort => {
                                log::error!("Fault poll failed, operator chose abort: {}", error);
                                return Err(error);
                            }
                        }
                    }
                }
            }
        }
    }

    async fn tick(&mut self) -> Result<()> {
        let alarms = self.client.get_alarms().await?;
        let event = self.alarm_tracker.lock().await.observe(alarms);
        if event != AlarmEvent::Quiet {
            self.sink.on_event(FaultClass::Alarm, &event);
        }

        let warnings = self.client.get_warnings().await?;
        let event = self.warning_tracker.lock().await.observe(warnings);
        if event != AlarmEvent::Quiet {
            self.sink.on_event(FaultClass::Warning, &event);
        }
        Ok(())
    }
}

/// Write one operator parameter and check the acknowledgement against
/// the configured success code. A `false` return means the device
/// answered but refused the value.
pub async fn set_parameter(
    client: &DeviceClient,
    success_code: &str,
    name: &str,
    value: f64,
) -> Result<bool> {
    let ack = client.set(name, value).await?;
    Ok(ack == success_code)
}

/// Feed the device watchdog on a fixed interval, independent of the
/// polling loops. Returns the first transport error it hits.
pub async fn watchdog_task(client: Arc<DeviceClient>, period: Duration) -> Result<()> {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        client.set_watchdog().await?;
    }
}
