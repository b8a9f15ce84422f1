//! Control console core for a serial-attached mechanical ventilator.
//!
//! Two tightly coupled subsystems live here: the line-oriented device
//! protocol client ([`serial`]) and the alarm/threshold supervision
//! engine ([`alarms`]). The device is the source of truth; everything
//! in this crate is built so that a recoverable communication hiccup
//! can never be mistaken for a cleared hardware alarm.
//!
//! Rendering is out of scope: the GUI attaches through the sink traits
//! in [`alarms::thresholds`] and [`polling`].

pub mod alarms;
pub mod config;
pub mod polling;
pub mod serial;

pub use alarms::{
    AlarmEvent, AlarmStateTracker, FaultClass, FaultCodec, MonitorId, MonitorSink,
    RunStateProvider, SharedRunState, ThresholdEngine,
};
pub use config::{ConsoleConfig, ThresholdConfig};
pub use serial::{
    DeviceClient, FakeDeviceLink, ObservableSnapshot, SerialError, SerialInterface, SerialSettings,
};
