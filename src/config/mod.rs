//! Startup configuration: serial settings, poll intervals, the
//! firmware's `get all` field order, and per-observable threshold
//! wiring. Loaded once from JSON and passed to each component; nothing
//! here is mutated at runtime except through explicit operator actions
//! on the threshold engine.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::alarms::{FaultClass, FaultCodec};
use crate::serial::SerialSettings;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Threshold wiring for one observable.
///
/// `min`/`max` is the static safe range; `setmin`/`setmax` the
/// operator-adjustable trigger range inside it (defaulting to the
/// static range when absent). The threshold codes name the alarm bits
/// associated with each crossing direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub linked_monitor: String,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub setmin: Option<f64>,
    #[serde(default)]
    pub setmax: Option<f64>,
    #[serde(default)]
    pub under_threshold_code: Option<u8>,
    #[serde(default)]
    pub over_threshold_code: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default)]
    pub serial: SerialSettings,

    #[serde(default = "default_sampling_interval_ms")]
    pub sampling_interval_ms: u64,
    #[serde(default = "default_fault_interval_ms")]
    pub alarm_interval_ms: u64,
    #[serde(default = "default_fault_interval_ms")]
    pub watchdog_interval_ms: u64,

    /// Acknowledgement string a successful `set` returns.
    #[serde(default = "default_return_success_code")]
    pub return_success_code: String,

    /// Field layout of the consolidated `get all` reply. Firmware
    /// defined; asserted against every reply.
    #[serde(default = "default_field_order")]
    pub field_order: Vec<String>,

    /// Threshold wiring keyed by observable name. Observables missing
    /// here are read and displayed but never alarmed on.
    #[serde(default = "default_thresholds")]
    pub thresholds: HashMap<String, ThresholdConfig>,

    /// Per-deployment overrides of the built-in fault descriptions.
    #[serde(default)]
    pub alarm_descriptions: HashMap<u8, String>,
    #[serde(default)]
    pub warning_descriptions: HashMap<u8, String>,
}

fn default_sampling_interval_ms() -> u64 {
    100
}

fn default_fault_interval_ms() -> u64 {
    1000
}

fn default_return_success_code() -> String {
    "OK".to_string()
}

fn default_field_order() -> Vec<String> {
    [
        "pressure",
        "flow",
        "o2",
        "bpm",
        "tidal",
        "peep",
        "temperature",
        "power_mode",
        "battery",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn threshold(
    linked_monitor: &str,
    min: f64,
    max: f64,
    under_code: u8,
    over_code: u8,
) -> ThresholdConfig {
    ThresholdConfig {
        linked_monitor: linked_monitor.to_string(),
        min: Some(min),
        max: Some(max),
        setmin: None,
        setmax: None,
        under_threshold_code: Some(under_code),
        over_threshold_code: Some(over_code),
    }
}

fn default_thresholds() -> HashMap<String, ThresholdConfig> {
    HashMap::from([
        ("pressure".to_string(), threshold("monitor_pressure", 0.0, 50.0, 8, 9)),
        ("flow".to_string(), threshold("monitor_flow", 0.0, 200.0, 10, 11)),
        ("o2".to_string(), threshold("monitor_o2", 21.0, 100.0, 16, 17)),
        ("bpm".to_string(), threshold("monitor_bpm", 4.0, 50.0, 20, 21)),
        ("tidal".to_string(), threshold("monitor_tidal", 50.0, 1500.0, 14, 15)),
        ("peep".to_string(), threshold("monitor_peep", 0.0, 20.0, 18, 19)),
    ])
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            serial: SerialSettings::default(),
            sampling_interval_ms: default_sampling_interval_ms(),
            alarm_interval_ms: default_fault_interval_ms(),
            watchdog_interval_ms: default_fault_interval_ms(),
            return_success_code: default_return_success_code(),
            field_order: default_field_order(),
            thresholds: default_thresholds(),
            alarm_descriptions: HashMap::new(),
            warning_descriptions: HashMap::new(),
        }
    }
}

impl ConsoleConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&raw)?;
        config.normalize();
        log::info!(
            "Loaded config from {} ({} threshold entries)",
            path.display(),
            config.thresholds.len()
        );
        Ok(config)
    }

    /// Fill operator trigger ranges from the static safe ranges where
    /// the file left them out.
    fn normalize(&mut self) {
        for entry in self.thresholds.values_mut() {
            entry.setmin = entry.setmin.or(entry.min);
            entry.setmax = entry.setmax.or(entry.max);
        }
    }

    /// Description table for one fault class, built-in defaults plus
    /// this deployment's overrides.
    pub fn fault_codec(&self, class: FaultClass) -> FaultCodec {
        let overrides = match class {
            FaultClass::Alarm => &self.alarm_descriptions,
            FaultClass::Warning => &self.warning_descriptions,
        };
        FaultCodec::with_overrides(class, overrides)
    }

    pub fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms)
    }

    pub fn alarm_interval(&self) -> Duration {
        Duration::from_millis(self.alarm_interval_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_usable() {
        let config = ConsoleConfig::default();
        assert_eq!(config.field_order.len(), 9);
        assert_eq!(config.serial.retry_budget, 10);
        assert!(config.thresholds.contains_key("pressure"));
    }

    #[test]
    fn test_parse_minimal_config() {
        let raw = r#"{
            "serial": { "port": "/dev/ttyACM0" },
            "thresholds": {
                "pressure": { "linked_monitor": "monitor_pressure", "min": 5.0, "max": 40.0 }
            }
        }"#;
        let mut config: ConsoleConfig = serde_json::from_str(raw).unwrap();
        config.normalize();

        assert_eq!(config.serial.port, "/dev/ttyACM0");
        assert_eq!(config.serial.baud_rate, 115200);
        let entry = &config.thresholds["pressure"];
        assert_eq!(entry.setmin, Some(5.0));
        assert_eq!(entry.setmax, Some(40.0));
    }

    #[test]
    fn test_description_overrides_reach_codec() {
        let raw = r#"{ "alarm_descriptions": { "0": "Supply pressure low" } }"#;
        let config: ConsoleConfig = serde_json::from_str(raw).unwrap();
        let codec = config.fault_codec(FaultClass::Alarm);
        assert_eq!(codec.describe(0), "Supply pressure low");
        assert_eq!(codec.describe(1), "Gas pressure too high");
    }
}
