pub mod codec;
pub mod thresholds;
pub mod tracker;

pub use codec::{unpack, FaultCodec};
pub use thresholds::{MonitorId, MonitorSink, RunStateProvider, SharedRunState, ThresholdEngine};
pub use tracker::{AlarmEvent, AlarmStateTracker};

use serde::{Deserialize, Serialize};

use crate::serial::SerialError;

/// Alarm bit reserved for conditions the console raises on the device's
/// behalf (threshold crossings), distinct from hardware-native bits.
pub const GUI_ALARM_CODE: u8 = 29;

/// The two independently-coded fault classes the device reports.
/// Each has its own bitmask parameter and description table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultClass {
    Alarm,
    Warning,
}

impl std::fmt::Display for FaultClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FaultClass::Alarm => write!(f, "alarm"),
            FaultClass::Warning => write!(f, "warning"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AlarmError {
    /// The device rejected or failed to process an acknowledgement.
    /// Local open/closed state is left untouched when this is returned.
    #[error("device rejected {class} acknowledgement: {source}")]
    AckFailed {
        class: FaultClass,
        #[source]
        source: SerialError,
    },
}
