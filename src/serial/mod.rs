pub mod client;
pub mod fake;
pub mod interface;

pub use client::DeviceClient;
pub use fake::FakeDeviceLink;
pub use interface::{SerialInterface, SerialLink};

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One consolidated reading of every observable the firmware reports.
pub type ObservableSnapshot = HashMap<String, f64>;

/// Serial line settings. The defaults match the device firmware:
/// 115200 baud, `\n`-terminated replies, 1 s read timeout, 10 retries
/// per command before the failure is escalated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialSettings {
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_terminator")]
    pub terminator: u8,
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
}

fn default_baud_rate() -> u32 {
    115200
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_terminator() -> u8 {
    b'\n'
}

fn default_retry_budget() -> u32 {
    10
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            terminator: default_terminator(),
            retry_budget: default_retry_budget(),
        }
    }
}

impl SerialSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Port is closed")]
    PortClosed,

    #[error("Communication timeout")]
    Timeout,

    #[error("ERROR in {verb}: line: '{command}'; output: {last_output:?}")]
    ProtocolFailure {
        verb: &'static str,
        command: String,
        last_output: String,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;
