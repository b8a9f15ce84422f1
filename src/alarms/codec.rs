//! Bitmask decoding and per-code descriptions for device faults.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use super::FaultClass;

/// Returned for bit positions the console does not know about, so a
/// firmware newer than the console still renders something.
pub const UNKNOWN_FAULT: &str = "Unknown error";

/// Alarm bit descriptions as defined by the device firmware. Bits 0-7
/// originate on the device, 8-21 are raised by the console on threshold
/// crossings, 31 is the firmware catch-all.
static ALARM_DESCRIPTIONS: Lazy<HashMap<u8, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (0, "Gas pressure too low"),
        (1, "Gas pressure too high"),
        (2, "Internal pressure too low (internal leakage)"),
        (3, "Internal pressure too high"),
        (4, "Out of battery power"),
        (5, "Leakage in gas circuit"),
        (6, "Obstruction in idraulic circuit"),
        (7, "Partial obstruction in idraulic circuit"),
        (8, "Pressure to patient mouth too low"),
        (9, "Pressure to patient mouth too high"),
        (10, "Inpiratory flux too low"),
        (11, "Inpiratory flux too high"),
        (12, "Expiratory flux too low"),
        (13, "Expiratory flux too high"),
        (14, "Tidal volume too low"),
        (15, "Tidal volume too high"),
        (16, "O2 too low"),
        (17, "O2 too high"),
        (18, "PEEP too low"),
        (19, "PEEP too high"),
        (20, "Respiratory rate too low"),
        (21, "Respiratory rate too high"),
        (31, "System failure"),
    ])
});

static WARNING_DESCRIPTIONS: Lazy<HashMap<u8, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (0, "Oxygen sensor requires calibration"),
        (1, "Power disconnected, system on battery"),
    ])
});

/// Decompose a fault bitmask into its set bit positions, ascending.
/// Consumers rely on the ascending order for deterministic display.
pub fn unpack(mask: u32) -> Vec<u8> {
    let mut positions = Vec::new();
    let mut remaining = mask;
    let mut bit = 0u8;
    while remaining != 0 {
        if remaining & 1 != 0 {
            positions.push(bit);
        }
        remaining >>= 1;
        bit += 1;
    }
    positions
}

/// Description table for one fault class, owned by whoever constructed
/// it. The defaults are copied out of the static firmware tables;
/// deployments can override individual entries from config.
#[derive(Debug, Clone)]
pub struct FaultCodec {
    class: FaultClass,
    descriptions: HashMap<u8, String>,
}

impl FaultCodec {
    pub fn for_class(class: FaultClass) -> Self {
        let table = match class {
            FaultClass::Alarm => &*ALARM_DESCRIPTIONS,
            FaultClass::Warning => &*WARNING_DESCRIPTIONS,
        };
        Self {
            class,
            descriptions: table
                .iter()
                .map(|(&code, &text)| (code, text.to_string()))
                .collect(),
        }
    }

    /// Defaults for `class` with individual entries replaced.
    pub fn with_overrides(class: FaultClass, overrides: &HashMap<u8, String>) -> Self {
        let mut codec = Self::for_class(class);
        for (&code, text) in overrides {
            codec.descriptions.insert(code, text.clone());
        }
        codec
    }

    pub fn class(&self) -> FaultClass {
        self.class
    }

    /// Human text for one bit position. Total over all positions:
    /// unknown bits fall back to [`UNKNOWN_FAULT`] instead of failing.
    pub fn describe(&self, position: u8) -> &str {
        self.descriptions
            .get(&position)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_FAULT)
    }

    /// Describe every set bit of `mask`, ascending by bit position.
    /// `with_code` suffixes each entry with the numeric position for
    /// diagnostic display.
    pub fn describe_all(&self, mask: u32, with_code: bool) -> Vec<String> {
        unpack(mask)
            .into_iter()
            .map(|position| {
                if with_code {
                    format!("{} (code: {})", self.describe(position), position)
                } else {
                    self.describe(position).to_string()
                }
            })
            .collect()
    }
}
