//! Edge detection for fault-class occurrence, one tracker per class.
//!
//! The device latches faults until acknowledged; the tracker mirrors
//! that model on the console side so the UI pops a notification once
//! per continuous occurrence instead of once per poll.

use chrono::{DateTime, Utc};

use crate::serial::DeviceClient;

use super::{AlarmError, FaultClass, FaultCodec};

/// What a poll observation means for the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum AlarmEvent {
    /// First non-zero mask since the last acknowledgement. The only
    /// event that should pop a new modal.
    Opened {
        descriptions: Vec<String>,
        raised_at: DateTime<Utc>,
    },
    /// Mask still non-zero while the notification is already up;
    /// update its text in place.
    StillOpen { descriptions: Vec<String> },
    /// Mask read back zero. Does not close the tracker: a zero between
    /// two non-zero reads must not be mistaken for an acknowledged
    /// condition.
    Quiet,
}

pub struct AlarmStateTracker {
    codec: FaultCodec,
    is_open: bool,
    opened_at: Option<DateTime<Utc>>,
}

impl AlarmStateTracker {
    pub fn new(codec: FaultCodec) -> Self {
        Self {
            codec,
            is_open: false,
            opened_at: None,
        }
    }

    pub fn class(&self) -> FaultClass {
        self.codec.class()
    }

    /// Whether a notification for this class is currently up.
    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    /// Feed one polled bitmask through the open/closed bookkeeping.
    pub fn observe(&mut self, mask: u32) -> AlarmEvent {
        if mask == 0 {
            return AlarmEvent::Quiet;
        }

        let descriptions = self.codec.describe_all(mask, false);
        if self.is_open {
            AlarmEvent::StillOpen { descriptions }
        } else {
            self.is_open = true;
            let raised_at = Utc::now();
            self.opened_at = Some(raised_at);
            log::warn!(
                "{} raised: {}",
                self.codec.class(),
                descriptions.join(" - ")
            );
            AlarmEvent::Opened {
                descriptions,
                raised_at,
            }
        }
    }

    /// Operator acknowledgement. Issues the class-appropriate reset to
    /// the device and closes the tracker only once the device confirmed
    /// it; on failure the tracker stays open so the UI re-shows the
    /// critical-error path instead of silently desyncing.
    pub async fn acknowledge(&mut self, client: &DeviceClient) -> Result<(), AlarmError> {
        let class = self.codec.class();
        let reset = match class {
            FaultClass::Alarm => client.reset_alarms().await,
            FaultClass::Warning => client.reset_warnings().await,
        };

        match reset {
            Ok(_) => {
                self.is_open = false;
                self.opened_at = None;
                log::info!("{} acknowledged", class);
                Ok(())
            }
            Err(source) => {
                log::error!("{} acknowledgement failed: {}", class, source);
                Err(AlarmError::AckFailed { class, source })
            }
        }
    }
}
