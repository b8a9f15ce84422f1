//! Continuous threshold supervision over live observable snapshots,
//! independent of the device's own hardware alarms.
//!
//! Crossings raise the composite console alarm bit on the device and
//! mark the linked monitor; clearing is always an explicit operator
//! action, and the device-level alarm is snoozed only once no monitor
//! remains out of range.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::ThresholdConfig;
use crate::serial::{DeviceClient, ObservableSnapshot, Result};

/// Identity of a monitored display slot, decoupled from any rendering
/// concern; the UI layer maps ids to widgets on its own side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonitorId(String);

impl MonitorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MonitorId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for MonitorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Display-side sink for one monitor. The engine pushes state; it owns
/// no rendering.
pub trait MonitorSink: Send {
    fn set_alarm_state(&mut self, alarmed: bool);
    fn update_thresholds(
        &mut self,
        min: Option<f64>,
        setmin: Option<f64>,
        max: Option<f64>,
        setmax: Option<f64>,
    );
}

/// Gate read on every poll tick: thresholds are only meaningful while
/// therapy is running.
pub trait RunStateProvider: Send + Sync {
    fn is_running(&self) -> bool;
}

/// Run-state flag shared with whatever start/stop workflow the host
/// application drives.
#[derive(Clone, Default)]
pub struct SharedRunState {
    running: Arc<AtomicBool>,
}

impl SharedRunState {
    pub fn new(running: bool) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(running)),
        }
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }
}

impl RunStateProvider for SharedRunState {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub struct ThresholdEngine {
    /// Threshold entries keyed by observable name.
    entries: HashMap<String, ThresholdConfig>,
    mon_to_obs: HashMap<MonitorId, String>,
    monitors: HashMap<MonitorId, Box<dyn MonitorSink>>,
    /// Monitors currently out of range: the composite device alarm is
    /// snoozed only when this set empties.
    alarmed: HashSet<MonitorId>,
    client: Arc<DeviceClient>,
    run_state: Arc<dyn RunStateProvider>,
}

impl ThresholdEngine {
    pub fn new(
        thresholds: HashMap<String, ThresholdConfig>,
        client: Arc<DeviceClient>,
        run_state: Arc<dyn RunStateProvider>,
    ) -> Self {
        let mut entries = HashMap::new();
        let mut mon_to_obs = HashMap::new();
        for (observable, mut entry) in thresholds {
            // Operator-adjustable bounds start at the static safe range.
            entry.setmin = entry.setmin.or(entry.min);
            entry.setmax = entry.setmax.or(entry.max);
            mon_to_obs.insert(
                MonitorId::from(entry.linked_monitor.as_str()),
                observable.clone(),
            );
            entries.insert(observable, entry);
        }
        Self {
            entries,
            mon_to_obs,
            monitors: HashMap::new(),
            alarmed: HashSet::new(),
            client,
            run_state,
        }
    }

    /// Attach the display sink for one monitor and push its configured
    /// bounds right away, so the display never shows a stale range.
    pub fn register_monitor(&mut self, id: MonitorId, sink: Box<dyn MonitorSink>) {
        self.monitors.insert(id.clone(), sink);
        self.push_thresholds_for(&id);
    }

    /// Push configured bounds to every registered monitor.
    pub fn push_thresholds(&mut self) {
        let ids: Vec<MonitorId> = self.monitors.keys().cloned().collect();
        for id in ids {
            self.push_thresholds_for(&id);
        }
    }

    fn push_thresholds_for(&mut self, id: &MonitorId) {
        let Some(observable) = self.mon_to_obs.get(id) else {
            return;
        };
        let Some(entry) = self.entries.get(observable) else {
            return;
        };
        let (min, setmin, max, setmax) = (entry.min, entry.setmin, entry.max, entry.setmax);
        if let Some(sink) = self.monitors.get_mut(id) {
            sink.update_thresholds(min, setmin, max, setmax);
        }
    }

    /// Run every observable of one poll snapshot through its configured
    /// trigger range. Observables without a threshold entry are skipped:
    /// telemetry may grow fields before alarm wiring exists for them.
    /// Skips everything while therapy is stopped.
    pub async fn set_data(&mut self, data: &ObservableSnapshot) -> Result<()> {
        if !self.run_state.is_running() {
            return Ok(());
        }

        for (observable, &value) in data {
            let Some(entry) = self.entries.get(observable) else {
                continue;
            };
            let over = entry.setmax.is_some_and(|limit| value > limit);
            let under = entry.setmin.is_some_and(|limit| value < limit);
            if !over && !under {
                continue;
            }

            let monitor_id = MonitorId::from(entry.linked_monitor.as_str());
            self.client.raise_gui_alarm().await?;
            if let Some(sink) = self.monitors.get_mut(&monitor_id) {
                sink.set_alarm_state(true);
            }
            if self.alarmed.insert(monitor_id.clone()) {
                log::warn!(
                    "Monitor {} out of range: {} = {}",
                    monitor_id,
                    observable,
                    value
                );
            }
        }
        Ok(())
    }

    /// Operator cleared one monitor. The device-level composite alarm
    /// is snoozed exactly when the open set empties, so clearing one
    /// reading never silences an alarm still active for another.
    pub async fn clear_alarm(&mut self, id: &MonitorId) -> Result<()> {
        if self.alarmed.remove(id) {
            log::info!("Monitor {} cleared by operator", id);
            if self.alarmed.is_empty() {
                self.client.snooze_gui_alarm().await?;
            }
        }
        Ok(())
    }

    /// Operator edit of the lower trigger bound. Takes effect on the
    /// next poll; the linked display is updated immediately.
    pub fn update_min(&mut self, id: &MonitorId, value: f64) {
        if let Some(observable) = self.mon_to_obs.get(id) {
            if let Some(entry) = self.entries.get_mut(observable) {
                entry.setmin = Some(value);
            }
            self.push_thresholds_for(id);
        }
    }

    /// Operator edit of the upper trigger bound.
    pub fn update_max(&mut self, id: &MonitorId, value: f64) {
        if let Some(observable) = self.mon_to_obs.get(id) {
            if let Some(entry) = self.entries.get_mut(observable) {
                entry.setmax = Some(value);
            }
            self.push_thresholds_for(id);
        }
    }

    fn entry_for(&self, id: &MonitorId) -> Option<&ThresholdConfig> {
        self.mon_to_obs
            .get(id)
            .and_then(|observable| self.entries.get(observable))
    }

    pub fn get_min(&self, id: &MonitorId) -> Option<f64> {
        self.entry_for(id).and_then(|entry| entry.min)
    }

    pub fn get_max(&self, id: &MonitorId) -> Option<f64> {
        self.entry_for(id).and_then(|entry| entry.max)
    }

    pub fn get_setmin(&self, id: &MonitorId) -> Option<f64> {
        self.entry_for(id).and_then(|entry| entry.setmin)
    }

    pub fn get_setmax(&self, id: &MonitorId) -> Option<f64> {
        self.entry_for(id).and_then(|entry| entry.setmax)
    }

    pub fn has_valid_minmax(&self, id: &MonitorId) -> bool {
        self.entry_for(id)
            .map(|entry| entry.min.is_some() && entry.max.is_some())
            .unwrap_or(false)
    }

    pub fn is_alarmed(&self, id: &MonitorId) -> bool {
        self.alarmed.contains(id)
    }

    /// Monitors currently considered in alarm.
    pub fn open_alarms(&self) -> Vec<MonitorId> {
        self.alarmed.iter().cloned().collect()
    }
}
