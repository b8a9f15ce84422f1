use std::fmt::Display;

use tokio::sync::Mutex;

use crate::alarms::GUI_ALARM_CODE;

use super::{ObservableSnapshot, Result, SerialError, SerialLink, SerialSettings};

/// Token every well-formed firmware reply starts with.
const REPLY_KEY: &str = "valore";

/// Typed request/response client for the device line protocol.
///
/// The link is held behind a mutex for the duration of one full
/// command/reply cycle (retries included), so a `set` issued from an
/// operator action and the periodic `get all` can never interleave
/// mid-command.
pub struct DeviceClient {
    link: Mutex<Box<dyn SerialLink>>,
    retry_budget: u32,
    field_order: Vec<String>,
}

impl DeviceClient {
    /// Build a client over an already-open link. `field_order` is the
    /// firmware-defined layout of the consolidated `get all` reply; it
    /// is asserted against every reply, not negotiated.
    pub fn new(
        link: impl SerialLink + 'static,
        settings: &SerialSettings,
        field_order: Vec<String>,
    ) -> Self {
        Self {
            link: Mutex::new(Box::new(link)),
            retry_budget: settings.retry_budget.max(1),
            field_order,
        }
    }

    /// Run one command through the write+read+parse cycle, retrying the
    /// whole cycle on malformed replies and read timeouts until the
    /// budget is exhausted. Transport failures abort immediately.
    async fn transact<T>(
        &self,
        verb: &'static str,
        command: String,
        parse: impl Fn(&str) -> std::result::Result<T, String>,
    ) -> Result<T> {
        let mut link = self.link.lock().await;
        let mut last_output = String::new();

        for attempt in 1..=self.retry_budget {
            link.write_line(command.as_bytes()).await?;
            match link.read_line().await {
                Ok(raw) => {
                    let text = String::from_utf8_lossy(&raw).to_string();
                    match parse_reply(&text).and_then(|value| parse(&value)) {
                        Ok(parsed) => return Ok(parsed),
                        Err(reason) => {
                            log::warn!(
                                "{} failing ({}/{}): {}: {:?}",
                                verb,
                                attempt,
                                self.retry_budget,
                                reason,
                                text
                            );
                            last_output = text;
                        }
                    }
                }
                Err(SerialError::Timeout) => {
                    log::warn!("{} timed out ({}/{})", verb, attempt, self.retry_budget);
                    last_output.clear();
                }
                Err(e) => return Err(e),
            }
        }

        Err(SerialError::ProtocolFailure {
            verb,
            command,
            last_output,
        })
    }

    /// Set a device parameter. Returns the trimmed acknowledgement
    /// string (`OK` on success). The command is re-transmitted on every
    /// retry, so the firmware must tolerate repeated `set` of the same
    /// value.
    pub async fn set<V: Display + Send>(&self, name: &str, value: V) -> Result<String> {
        let command = format!("set {} {}\r\n", name, value);
        self.transact("set", command, |value| Ok(value.to_string()))
            .await
    }

    /// Read one device parameter as its raw string value.
    pub async fn get(&self, name: &str) -> Result<String> {
        let command = format!("get {}\r\n", name);
        self.transact("get", command, |value| Ok(value.to_string()))
            .await
    }

    /// Read every observable in one wire round trip. The reply is a
    /// comma-separated list zipped against the configured field order;
    /// a count mismatch is a parse failure subject to the retry budget.
    pub async fn get_all(&self) -> Result<ObservableSnapshot> {
        self.transact("get", "get all\r\n".to_string(), |value| {
            let fields: Vec<&str> = value.split(',').collect();
            if fields.len() != self.field_order.len() {
                return Err(format!(
                    "expected {} fields, got {}",
                    self.field_order.len(),
                    fields.len()
                ));
            }
            let mut snapshot = ObservableSnapshot::new();
            for (name, field) in self.field_order.iter().zip(fields) {
                let parsed: f64 = field
                    .trim()
                    .parse()
                    .map_err(|_| format!("field '{}' is not numeric: {:?}", name, field))?;
                snapshot.insert(name.clone(), parsed);
            }
            Ok(snapshot)
        })
        .await
    }

    /// Current hardware alarm bitmask.
    pub async fn get_alarms(&self) -> Result<u32> {
        self.transact("get", "get alarm\r\n".to_string(), parse_mask)
            .await
    }

    /// Current warning bitmask.
    pub async fn get_warnings(&self) -> Result<u32> {
        self.transact("get", "get warning\r\n".to_string(), parse_mask)
            .await
    }

    /// Acknowledge every latched alarm on the device.
    pub async fn reset_alarms(&self) -> Result<String> {
        self.set("alarm", 0).await
    }

    /// Acknowledge every latched warning on the device.
    pub async fn reset_warnings(&self) -> Result<String> {
        self.set("warning", 0).await
    }

    /// Latch a specific alarm bitmask on the device.
    pub async fn raise_alarm(&self, mask: u32) -> Result<String> {
        self.set("alarm", mask).await
    }

    /// Latch the composite console alarm bit. Raising it while already
    /// raised is harmless.
    pub async fn raise_gui_alarm(&self) -> Result<String> {
        self.raise_alarm(1 << GUI_ALARM_CODE).await
    }

    /// Silence one latched alarm bit without touching the others.
    pub async fn snooze_hw_alarm(&self, code: u8) -> Result<String> {
        self.set("alarm_snooze", 1u32 << code).await
    }

    /// Silence the composite console alarm bit.
    pub async fn snooze_gui_alarm(&self) -> Result<String> {
        self.snooze_hw_alarm(GUI_ALARM_CODE).await
    }

    /// Feed the device watchdog; meant to run on its own fixed interval
    /// so idle UI time never trips the device-side timer.
    pub async fn set_watchdog(&self) -> Result<String> {
        self.set("watchdog_reset", 1).await
    }

    /// Close the underlying link. Safe to call more than once.
    pub async fn close(&self) {
        self.link.lock().await.close();
    }
}

/// Split a raw reply into the `valore` key and its value, tolerating
/// whitespace on either side of the `=`.
fn parse_reply(raw: &str) -> std::result::Result<String, String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| "protocol error: 'valore=' expected".to_string())?;
    if key.trim() != REPLY_KEY {
        return Err(format!("protocol error: unexpected key {:?}", key.trim()));
    }
    Ok(value.trim().to_string())
}

/// Bitmasks arrive as integers, but some firmware revisions print them
/// through the float formatter (`"3.0"`); both are accepted.
fn parse_mask(value: &str) -> std::result::Result<u32, String> {
    if let Ok(mask) = value.parse::<u32>() {
        return Ok(mask);
    }
    match value.parse::<f64>() {
        Ok(f) if f >= 0.0 && f.fract() == 0.0 && f <= u32::MAX as f64 => Ok(f as u32),
        _ => Err(format!("not a bitmask: {:?}", value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reply_trims_whitespace() {
        assert_eq!(parse_reply("valore = 42 ").unwrap(), "42");
        assert_eq!(parse_reply(" valore=OK").unwrap(), "OK");
    }

    #[test]
    fn test_parse_reply_rejects_wrong_key() {
        assert!(parse_reply("value=42").is_err());
        assert!(parse_reply("garbage").is_err());
    }

    #[test]
    fn test_parse_mask_accepts_float_integers() {
        assert_eq!(parse_mask("3").unwrap(), 3);
        assert_eq!(parse_mask("3.0").unwrap(), 3);
        assert!(parse_mask("3.5").is_err());
        assert!(parse_mask("-1").is_err());
    }
}
